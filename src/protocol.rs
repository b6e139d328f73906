//! Wire shapes exchanged with the agent and the classification of inbound
//! messages.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{adapter::FieldDescriptor, error::RpcError};

pub const JSONRPC_VERSION: &str = "2.0";

/// Methods the agent may call on the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMethod {
    ToolsList,
    ToolsCall,
}

impl PeerMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "tools/list" => Some(Self::ToolsList),
            "tools/call" => Some(Self::ToolsCall),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerRequest {
    pub jsonrpc: Option<String>,
    /// Present when the agent expects a reply.
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentOutcome {
    Result(Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub message_id: String,
    pub outcome: AgentOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(PeerRequest),
    Response(AgentResponse),
    Unrecognized(Value),
}

impl Inbound {
    pub fn classify(value: Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Unrecognized(value);
        };

        if let Some(method) = object.get("method") {
            return Self::Request(PeerRequest {
                jsonrpc: object
                    .get("jsonrpc")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                id: object.get("id").filter(|id| !id.is_null()).cloned(),
                method: method.as_str().unwrap_or_default().to_string(),
                params: object.get("params").cloned(),
            });
        }

        if let Some(message_id) = read_message_id(object) {
            let outcome = match object.get("error") {
                Some(error) if !error.is_null() => AgentOutcome::Error(error_text(error)),
                _ => AgentOutcome::Result(object.get("result").cloned().unwrap_or(Value::Null)),
            };
            return Self::Response(AgentResponse {
                message_id,
                outcome,
            });
        }

        Self::Unrecognized(value)
    }
}

fn read_message_id(object: &Map<String, Value>) -> Option<String> {
    match object.get("messageId")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Object(object) => object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Prompt sent to the agent on behalf of the local user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundPrompt {
    pub message: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub page_url: String,
    pub page_title: String,
    pub form_fields: Vec<FieldDescriptor>,
}

pub fn success_reply(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

pub fn error_reply(id: Value, error: &RpcError) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": error,
    })
}

const PREVIEW_LIMIT: usize = 200;

/// Shortens a raw payload for log lines and error messages, cutting on a
/// char boundary.
pub fn preview(raw: &str) -> String {
    if raw.len() <= PREVIEW_LIMIT {
        return raw.to_string();
    }
    let mut end = PREVIEW_LIMIT;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &raw[..end])
}
