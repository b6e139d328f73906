use serde_json::{json, Value};

use crate::{
    context::BridgeContext,
    error::RpcError,
    executor::ToolExecutor,
    protocol::{
        error_reply, preview, success_reply, Inbound, PeerMethod, PeerRequest, JSONRPC_VERSION,
    },
    registry::CapabilityRegistry,
    tracker::{OutboundTracker, ResolvedPrompt},
};

/// What the bridge loop has to do after a message was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Send this reply back on the session.
    Reply(Value),
    /// A pending prompt was answered.
    Resolved(ResolvedPrompt),
    /// Nothing to send: a notification, an answer for an unknown prompt, or
    /// a message that could not be classified.
    Nothing,
}

pub struct Dispatcher {
    registry: CapabilityRegistry,
    executor: ToolExecutor,
}

impl Dispatcher {
    pub fn new(ctx: &BridgeContext) -> Self {
        let registry = CapabilityRegistry::new(ctx);
        let executor = ToolExecutor::new(ctx, registry.clone());
        Self { registry, executor }
    }

    pub fn dispatch(&self, message: Value, tracker: &mut OutboundTracker) -> Dispatched {
        match Inbound::classify(message) {
            Inbound::Request(request) => self.handle_request(request),
            Inbound::Response(response) => {
                match tracker.resolve(&response.message_id, response.outcome) {
                    Some(resolved) => {
                        tracing::info!(id = %response.message_id, "prompt answered");
                        Dispatched::Resolved(resolved)
                    }
                    None => Dispatched::Nothing,
                }
            }
            Inbound::Unrecognized(value) => {
                tracing::warn!(
                    payload = %preview(&value.to_string()),
                    "dropping unrecognized message"
                );
                Dispatched::Nothing
            }
        }
    }

    fn handle_request(&self, request: PeerRequest) -> Dispatched {
        let PeerRequest {
            jsonrpc,
            id,
            method,
            params,
        } = request;

        if jsonrpc.as_deref().is_some_and(|version| version != JSONRPC_VERSION) {
            tracing::debug!(method = %method, version = ?jsonrpc, "unexpected jsonrpc version");
        }

        let result = match PeerMethod::parse(&method) {
            Some(method) => self.route(method, params.as_ref()),
            None => Err(RpcError::method_not_found(format!("Method not found: {method}"))),
        };

        let Some(id) = id else {
            if let Err(error) = &result {
                tracing::warn!(method = %method, error = %error.message, "notification failed");
            }
            return Dispatched::Nothing;
        };

        match result {
            Ok(value) => Dispatched::Reply(success_reply(id, value)),
            Err(error) => {
                tracing::warn!(
                    method = %method,
                    code = error.code,
                    error = %error.message,
                    "peer request failed"
                );
                Dispatched::Reply(error_reply(id, &error))
            }
        }
    }

    fn route(&self, method: PeerMethod, params: Option<&Value>) -> Result<Value, RpcError> {
        tracing::debug!(method = method.as_str(), "peer request");
        match method {
            PeerMethod::ToolsList => {
                let tools = self.registry.list_tools();
                Ok(json!({ "tools": tools }))
            }
            PeerMethod::ToolsCall => {
                let params = match params {
                    Some(Value::Object(params)) => params,
                    _ => {
                        return Err(RpcError::invalid_params(
                            "tools/call params must be an object",
                        ));
                    }
                };
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let output = self.executor.call(name, params.get("arguments"))?;
                serde_json::to_value(output).map_err(|error| RpcError::internal(error.to_string()))
            }
        }
    }
}
