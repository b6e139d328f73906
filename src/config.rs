use std::{env, path::PathBuf, time::Duration};

use crate::error::BridgeError;

pub const DEFAULT_AGENT_URL: &str = "ws://localhost:8000/chat";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub agent_url: String,
    pub connect_timeout: Duration,
    /// Pending prompts older than this are discarded by the bridge loop.
    /// `None` keeps them until the agent answers or the caller discards them.
    pub prompt_timeout: Option<Duration>,
    pub strict_arguments: bool,
    pub page_url: String,
    pub page_title: String,
    pub form_file: Option<PathBuf>,
}

impl BridgeConfig {
    pub fn new(agent_url: impl Into<String>) -> Self {
        Self {
            agent_url: agent_url.into(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            prompt_timeout: None,
            strict_arguments: false,
            page_url: String::new(),
            page_title: String::new(),
            form_file: None,
        }
    }

    pub fn from_env() -> Result<Self, BridgeError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let agent_url = lookup("BRIDGE_AGENT_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_URL.to_string());
        if !agent_url.starts_with("ws://") && !agent_url.starts_with("wss://") {
            return Err(BridgeError::Config(format!(
                "BRIDGE_AGENT_URL must use ws:// or wss://, got {agent_url}"
            )));
        }

        let connect_timeout = parse_millis(&lookup, "BRIDGE_CONNECT_TIMEOUT_MS")?
            .unwrap_or(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS));
        let prompt_timeout = parse_millis(&lookup, "BRIDGE_PROMPT_TIMEOUT_MS")?;

        let strict_arguments = lookup("BRIDGE_STRICT_ARGUMENTS")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let page_url = lookup("BRIDGE_PAGE_URL").unwrap_or_default();
        let page_title = lookup("BRIDGE_PAGE_TITLE").unwrap_or_default();
        let form_file = lookup("BRIDGE_FORM_FILE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            agent_url,
            connect_timeout,
            prompt_timeout,
            strict_arguments,
            page_url,
            page_title,
            form_file,
        })
    }
}

fn parse_millis<F>(lookup: &F, name: &str) -> Result<Option<Duration>, BridgeError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    match raw.parse::<u64>() {
        Ok(0) => Err(BridgeError::Config(format!("{name} must be greater than zero"))),
        Ok(ms) => Ok(Some(Duration::from_millis(ms))),
        Err(_) => Err(BridgeError::Config(format!(
            "{name} must be a number of milliseconds, got {raw}"
        ))),
    }
}
