use std::sync::Arc;

use form_bridge::{
    AgentOutcome, Bridge, BridgeConfig, BridgeContext, BridgeError, BridgeEvent, BridgeHandle,
    FieldDescriptor, FieldOption, MemoryForm, ResourceLocation,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "form-bridge failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BridgeError> {
    let config = BridgeConfig::from_env()?;
    let form = Arc::new(load_form(&config).await?);

    let ctx = BridgeContext::new(config, form.clone());
    let (bridge, handle, mut events) = Bridge::connect(ctx).await?;
    let mut bridge_task = tokio::spawn(bridge.run());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            report(event);
        }
    });

    // Stop on end of input or when the agent goes away, whichever comes first.
    let finished = tokio::select! {
        _ = read_prompts(&handle, &form) => {
            let _ = handle.close();
            bridge_task.await
        }
        finished = &mut bridge_task => finished,
    };

    match finished {
        Ok(result) => result,
        Err(error) => Err(BridgeError::Connection(format!("bridge task aborted: {error}"))),
    }
}

async fn read_prompts(handle: &BridgeHandle, form: &MemoryForm) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                tracing::error!(error = %error, "stdin read error");
                break;
            }
        };

        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == ":form" {
            match serde_json::to_string_pretty(&form.snapshot()) {
                Ok(text) => println!("{text}"),
                Err(error) => tracing::error!(error = %error, "failed to render form"),
            }
            continue;
        }
        if prompt == ":quit" {
            break;
        }

        match handle.send_prompt(prompt).await {
            Ok(id) => tracing::info!(id = %id, "prompt queued"),
            Err(BridgeError::Stopped) => break,
            Err(error) => tracing::error!(error = %error, "prompt not sent"),
        }
    }
}

fn report(event: BridgeEvent) {
    match event {
        BridgeEvent::Status(state) => tracing::info!(state = %state, "agent connection"),
        BridgeEvent::ConnectionError(message) => {
            tracing::error!(error = %message, "agent connection problem");
        }
        BridgeEvent::PromptSent { id } => tracing::debug!(id = %id, "prompt sent"),
        BridgeEvent::PromptResolved(resolved) => match resolved.outcome {
            AgentOutcome::Result(value) => match value.as_str() {
                Some(text) => println!("[{}] {text}", resolved.request.id),
                None => println!("[{}] {value}", resolved.request.id),
            },
            AgentOutcome::Error(message) => {
                println!("[{}] agent error: {message}", resolved.request.id);
            }
        },
        BridgeEvent::PromptExpired(request) => {
            println!("[{}] no answer from the agent, giving up", request.id);
        }
        BridgeEvent::ProtocolError(message) => {
            tracing::warn!(error = %message, "bad message from agent");
        }
    }
}

async fn load_form(config: &BridgeConfig) -> Result<MemoryForm, BridgeError> {
    let location = ResourceLocation {
        url: config.page_url.clone(),
        title: config.page_title.clone(),
    };

    let fields = match &config.form_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await.map_err(|error| {
                BridgeError::Config(format!("failed to read {}: {error}", path.display()))
            })?;
            serde_json::from_str::<Vec<FieldDescriptor>>(&raw).map_err(|error| {
                BridgeError::Config(format!("invalid form file {}: {error}", path.display()))
            })?
        }
        None => sample_fields(),
    };

    tracing::info!(fields = fields.len(), "form loaded");
    Ok(MemoryForm::new(location, fields))
}

fn sample_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::text("name").with_label("Full name").required(),
        FieldDescriptor::text("email").with_label("Email address").required(),
        FieldDescriptor::single_choice(
            "country",
            vec![
                FieldOption::new("us", "United States"),
                FieldOption::new("gb", "United Kingdom"),
                FieldOption::new("de", "Germany"),
            ],
        )
        .with_label("Country"),
        FieldDescriptor::multi_choice(
            "interests",
            vec![
                FieldOption::new("news", "Product news"),
                FieldOption::new("events", "Events"),
                FieldOption::new("research", "Research"),
            ],
        )
        .with_label("Interests"),
        FieldDescriptor::boolean("newsletter").with_label("Subscribe to the newsletter"),
    ]
}
