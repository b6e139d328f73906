use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use form_bridge::{
    tracker::PromptState, AgentOutcome, Bridge, BridgeConfig, BridgeContext, BridgeError,
    BridgeEvent, FieldDescriptor, FieldValue, MemoryForm, ResourceLocation, SessionState,
};
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, Mutex},
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

struct MockAgent {
    url: String,
    to_bridge: mpsc::UnboundedSender<String>,
    from_bridge: mpsc::UnboundedReceiver<Value>,
}

impl MockAgent {
    fn send(&self, message: Value) {
        self.send_raw(message.to_string());
    }

    fn send_raw(&self, text: impl Into<String>) {
        self.to_bridge.send(text.into()).expect("mock agent socket alive");
    }

    async fn recv(&mut self) -> Value {
        timeout(WAIT, self.from_bridge.recv())
            .await
            .expect("bridge message in time")
            .expect("mock agent inbox open")
    }
}

#[derive(Clone)]
struct AgentState {
    inbox: mpsc::UnboundedSender<Value>,
    outbox: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
}

async fn start_agent() -> MockAgent {
    let (to_bridge, outbox) = mpsc::unbounded_channel();
    let (inbox, from_bridge) = mpsc::unbounded_channel();
    let state = AgentState {
        inbox,
        outbox: Arc::new(Mutex::new(Some(outbox))),
    };

    let app = Router::new()
        .route("/chat", get(chat_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock agent");
    let addr = listener.local_addr().expect("mock agent addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockAgent {
        url: format!("ws://{addr}/chat"),
        to_bridge,
        from_bridge,
    }
}

async fn chat_handler(ws: WebSocketUpgrade, State(state): State<AgentState>) -> Response {
    ws.on_upgrade(move |socket| agent_socket(socket, state))
}

async fn agent_socket(mut socket: WebSocket, state: AgentState) {
    let Some(mut outbox) = state.outbox.lock().await.take() else {
        return;
    };

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = state.inbox.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            outgoing = outbox.recv() => match outgoing {
                Some(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    if socket.send(Message::Close(None)).await.is_ok() {
                        // Report whether the bridge answered the close frame.
                        let answered = matches!(
                            timeout(WAIT, socket.recv()).await,
                            Ok(Some(Ok(Message::Close(_))))
                        );
                        let _ = state.inbox.send(json!({ "closeAnswered": answered }));
                    }
                    break;
                }
            },
        }
    }
}

fn signup_form() -> Arc<MemoryForm> {
    Arc::new(MemoryForm::new(
        ResourceLocation {
            url: "https://example.test/signup".into(),
            title: "Signup".into(),
        },
        vec![
            FieldDescriptor::text("name").with_label("Full name").required(),
            FieldDescriptor::boolean("newsletter").with_label("Newsletter"),
        ],
    ))
}

async fn next_matching<F>(
    events: &mut mpsc::UnboundedReceiver<BridgeEvent>,
    matches: F,
) -> BridgeEvent
where
    F: Fn(&BridgeEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("bridge events open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("bridge event in time")
}

#[tokio::test]
async fn serves_tool_requests_over_the_socket() {
    let mut agent = start_agent().await;
    let form = signup_form();
    let ctx = BridgeContext::new(BridgeConfig::new(agent.url.clone()), form.clone());
    let (bridge, _handle, mut events) = Bridge::connect(ctx).await.expect("connect to mock agent");
    tokio::spawn(bridge.run());

    next_matching(&mut events, |event| {
        matches!(event, BridgeEvent::Status(SessionState::Open))
    })
    .await;

    agent.send(json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }));
    let listed = agent.recv().await;
    assert_eq!(listed["id"], 1);
    assert_eq!(listed["result"]["tools"][0]["name"], "fill_form_data");
    assert_eq!(
        listed["result"]["tools"][0]["inputSchema"]["properties"]["formData"]["required"],
        json!(["name", "newsletter"])
    );

    agent.send(json!({
        "jsonrpc": "2.0",
        "id": "call-2",
        "method": "tools/call",
        "params": { "name": "fill_form_data", "arguments": { "formData": { "name": "Ada" } } }
    }));
    let filled = agent.recv().await;
    assert_eq!(filled["id"], "call-2");
    assert_eq!(
        filled["result"],
        json!({ "content": [{ "type": "text", "text": "Form filled successfully" }] })
    );
    assert_eq!(form.value("name"), Some(FieldValue::Text("Ada".into())));
    assert_eq!(form.value("newsletter"), Some(FieldValue::Flag(false)));

    agent.send(json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "tools/call",
        "params": { "name": "submit_form", "arguments": {} }
    }));
    let unknown = agent.recv().await;
    assert_eq!(unknown["id"], 3);
    assert_eq!(unknown["error"]["code"], -32601);

    // A malformed payload gets no reply; the next request is answered normally.
    agent.send_raw("{not json");
    agent.send(json!({ "jsonrpc": "2.0", "id": 4, "method": "prompts/list" }));
    let next = agent.recv().await;
    assert_eq!(next["id"], 4);
    assert_eq!(next["error"]["code"], -32601);
    next_matching(&mut events, |event| matches!(event, BridgeEvent::ProtocolError(_))).await;
}

#[tokio::test]
async fn correlates_prompts_with_agent_answers() {
    let mut agent = start_agent().await;
    let ctx = BridgeContext::new(BridgeConfig::new(agent.url.clone()), signup_form());
    let (bridge, handle, mut events) = Bridge::connect(ctx).await.expect("connect to mock agent");
    tokio::spawn(bridge.run());

    let first = handle.send_prompt("Fill in my name, it's Ada").await.expect("first prompt");
    let second = handle.send_prompt("Also subscribe me").await.expect("second prompt");
    assert_ne!(first, second);

    let prompt = agent.recv().await;
    assert_eq!(prompt["messageId"], first.as_str());
    assert_eq!(prompt["message"], "Fill in my name, it's Ada");
    assert_eq!(prompt["page_url"], "https://example.test/signup");
    assert_eq!(prompt["page_title"], "Signup");
    assert_eq!(prompt["form_fields"][0]["id"], "name");
    assert_eq!(prompt["form_fields"][1]["type"], "boolean");
    let prompt = agent.recv().await;
    assert_eq!(prompt["messageId"], second.as_str());

    agent.send(json!({ "messageId": first, "result": "I filled in your name." }));
    let resolved = next_matching(&mut events, |event| {
        matches!(event, BridgeEvent::PromptResolved(_))
    })
    .await;
    let BridgeEvent::PromptResolved(resolved) = resolved else {
        unreachable!();
    };
    assert_eq!(resolved.request.id, first);
    assert_eq!(resolved.outcome, AgentOutcome::Result(json!("I filled in your name.")));

    // A repeated answer for the first prompt is ignored; the second is still pending.
    agent.send(json!({ "messageId": first, "result": "again" }));
    let discarded = handle
        .discard(second.clone())
        .await
        .expect("bridge running")
        .expect("second prompt still pending");
    assert_eq!(discarded.state, PromptState::Discarded);
    assert!(handle.discard(second).await.expect("bridge running").is_none());
}

#[tokio::test]
async fn agent_disconnect_stops_the_bridge() {
    let MockAgent {
        url,
        to_bridge,
        mut from_bridge,
    } = start_agent().await;
    let ctx = BridgeContext::new(BridgeConfig::new(url), signup_form());
    let (bridge, handle, mut events) = Bridge::connect(ctx).await.expect("connect to mock agent");
    let task = tokio::spawn(bridge.run());

    drop(to_bridge);
    next_matching(&mut events, |event| {
        matches!(event, BridgeEvent::Status(SessionState::Closed))
    })
    .await;

    let handshake = timeout(WAIT, from_bridge.recv())
        .await
        .expect("close report in time")
        .expect("mock agent inbox open");
    assert_eq!(handshake, json!({ "closeAnswered": true }));

    timeout(WAIT, task)
        .await
        .expect("bridge stops in time")
        .expect("bridge task joins")
        .expect("bridge exits cleanly");

    let error = handle.send_prompt("anyone there?").await.expect_err("bridge stopped");
    assert!(matches!(error, BridgeError::Stopped));
}

#[tokio::test]
async fn unanswered_prompts_expire_after_the_timeout() {
    let mut agent = start_agent().await;
    let mut config = BridgeConfig::new(agent.url.clone());
    config.prompt_timeout = Some(Duration::from_millis(50));
    let ctx = BridgeContext::new(config, signup_form());
    let (bridge, handle, mut events) = Bridge::connect(ctx).await.expect("connect to mock agent");
    tokio::spawn(bridge.run());

    let id = handle.send_prompt("is anyone there?").await.expect("prompt sent");
    let prompt = agent.recv().await;
    assert_eq!(prompt["messageId"], id.as_str());

    let expired = next_matching(&mut events, |event| {
        matches!(event, BridgeEvent::PromptExpired(_))
    })
    .await;
    let BridgeEvent::PromptExpired(expired) = expired else {
        unreachable!();
    };
    assert_eq!(expired.id, id);
    assert_eq!(expired.state, PromptState::Discarded);

    // A late answer no longer resolves anything.
    agent.send(json!({ "messageId": id, "result": "too late" }));
    assert!(handle.discard(id).await.expect("bridge running").is_none());
}

#[tokio::test]
async fn close_from_the_handle_stops_the_bridge() {
    let agent = start_agent().await;
    let ctx = BridgeContext::new(BridgeConfig::new(agent.url.clone()), signup_form());
    let (bridge, handle, mut events) = Bridge::connect(ctx).await.expect("connect to mock agent");
    let task = tokio::spawn(bridge.run());

    handle.close().expect("bridge running");
    next_matching(&mut events, |event| {
        matches!(event, BridgeEvent::Status(SessionState::Closed))
    })
    .await;

    timeout(WAIT, task)
        .await
        .expect("bridge stops in time")
        .expect("bridge task joins")
        .expect("bridge exits cleanly");
}

#[tokio::test]
async fn unreachable_agent_is_a_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe port");
    let port = listener.local_addr().expect("probe addr").port();
    drop(listener);

    let mut config = BridgeConfig::new(format!("ws://127.0.0.1:{port}/chat"));
    config.connect_timeout = Duration::from_secs(2);
    let ctx = BridgeContext::new(config, signup_form());

    let error = Bridge::connect(ctx).await.err().expect("connect fails");
    assert!(matches!(error, BridgeError::Connection(_)));
}
