use std::{collections::HashSet, sync::Arc};

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{
    adapter::ResourceAdapter,
    context::BridgeContext,
    error::RpcError,
    registry::{BuiltinTool, CapabilityRegistry, ToolDefinition, FORM_DATA_ARGUMENT},
};

pub const FILL_CONFIRMATION: &str = "Form filled successfully";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

pub type ToolCallResult = Result<ToolOutput, RpcError>;

/// Runs tool calls against the resource adapter. The only component that
/// mutates it.
pub struct ToolExecutor {
    registry: CapabilityRegistry,
    adapter: Arc<dyn ResourceAdapter>,
    strict_arguments: bool,
}

impl ToolExecutor {
    pub fn new(ctx: &BridgeContext, registry: CapabilityRegistry) -> Self {
        Self {
            registry,
            adapter: ctx.adapter().clone(),
            strict_arguments: ctx.config().strict_arguments,
        }
    }

    pub fn call(&self, tool_name: &str, arguments: Option<&Value>) -> ToolCallResult {
        let Some((tool, definition)) = self.registry.find(tool_name) else {
            return Err(RpcError::method_not_found(format!("Tool not found: {tool_name}")));
        };

        let arguments = match arguments {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(format!(
                    "{tool_name} arguments must be an object"
                )));
            }
        };

        match tool {
            BuiltinTool::FillFormData => self.fill_form(&definition, &arguments),
        }
    }

    fn fill_form(
        &self,
        definition: &ToolDefinition,
        arguments: &Map<String, Value>,
    ) -> ToolCallResult {
        let form_data = match arguments.get(FORM_DATA_ARGUMENT) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(format!(
                    "{FORM_DATA_ARGUMENT} must be an object"
                )));
            }
        };

        if self.strict_arguments {
            let missing = definition
                .required_fields()
                .iter()
                .filter(|field| !form_data.contains_key(field.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                return Err(RpcError::invalid_params(format!(
                    "missing required fields: {}",
                    missing.join(", ")
                ))
                .with_data(json!({ "missing": missing })));
            }
        }

        let known = definition
            .required_fields()
            .iter()
            .map(String::as_str)
            .collect::<HashSet<_>>();

        let mut applied = 0usize;
        for (field_id, value) in &form_data {
            if !known.contains(field_id.as_str()) {
                tracing::warn!(field = %field_id, "skipping value for unknown field");
                continue;
            }

            // Already applied fields stay applied when a later one fails.
            if let Err(error) = self.adapter.set(field_id, value) {
                tracing::warn!(
                    field = %field_id,
                    applied = applied,
                    error = %error,
                    "form mutation failed"
                );
                return Err(RpcError::internal(error.to_string()));
            }
            applied += 1;
        }

        tracing::info!(applied = applied, "form filled");
        Ok(ToolOutput::text(FILL_CONFIRMATION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::{AdapterError, FieldDescriptor, ResourceLocation},
        config::BridgeConfig,
        memory::{FieldValue, MemoryForm},
    };
    use std::sync::Mutex;

    fn executor_for(adapter: Arc<dyn ResourceAdapter>, strict: bool) -> ToolExecutor {
        let mut config = BridgeConfig::new("ws://localhost:8000/chat");
        config.strict_arguments = strict;
        let ctx = BridgeContext::new(config, adapter);
        ToolExecutor::new(&ctx, CapabilityRegistry::new(&ctx))
    }

    fn signup_form() -> Arc<MemoryForm> {
        Arc::new(MemoryForm::new(
            ResourceLocation::default(),
            vec![
                FieldDescriptor::text("name").required(),
                FieldDescriptor::boolean("newsletter"),
            ],
        ))
    }

    /// Records every `set` call and fails on a chosen field.
    struct RecordingAdapter {
        fields: Vec<FieldDescriptor>,
        fail_on: Option<&'static str>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ResourceAdapter for RecordingAdapter {
        fn describe(&self) -> Vec<FieldDescriptor> {
            self.fields.clone()
        }

        fn set(&self, field_id: &str, value: &Value) -> Result<(), AdapterError> {
            if self.fail_on == Some(field_id) {
                return Err(AdapterError::Unavailable(format!("{field_id} is disabled")));
            }
            self.calls
                .lock()
                .expect("calls lock")
                .push((field_id.to_string(), value.clone()));
            Ok(())
        }
    }

    #[test]
    fn partial_arguments_leave_other_fields_untouched() {
        let form = signup_form();
        form.set("newsletter", &json!(true)).expect("seed newsletter");
        let executor = executor_for(form.clone(), false);

        let output = executor
            .call("fill_form_data", Some(&json!({ "formData": { "name": "Ada" } })))
            .expect("fill succeeds");

        assert_eq!(output, ToolOutput::text("Form filled successfully"));
        assert_eq!(form.value("name"), Some(FieldValue::Text("Ada".into())));
        assert_eq!(form.value("newsletter"), Some(FieldValue::Flag(true)));
    }

    #[test]
    fn every_provided_field_is_set_exactly_once() {
        let adapter = Arc::new(RecordingAdapter {
            fields: vec![FieldDescriptor::text("name"), FieldDescriptor::text("email")],
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        });
        let executor = executor_for(adapter.clone(), false);

        executor
            .call(
                "fill_form_data",
                Some(&json!({
                    "formData": { "name": "Ada", "email": "ada@example.test", "fax": "1" }
                })),
            )
            .expect("fill succeeds");

        let mut calls = adapter.calls.lock().expect("calls lock").clone();
        calls.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            calls,
            vec![
                ("email".to_string(), json!("ada@example.test")),
                ("name".to_string(), json!("Ada")),
            ]
        );
    }

    #[test]
    fn unknown_tool_is_method_not_found() {
        let executor = executor_for(signup_form(), false);
        let error = executor
            .call("submit_form", Some(&json!({})))
            .expect_err("unknown tool");
        assert_eq!(error.code, -32601);
        assert!(error.message.contains("submit_form"));
    }

    #[test]
    fn adapter_failure_is_internal_error_without_rollback() {
        let adapter = Arc::new(RecordingAdapter {
            fields: vec![FieldDescriptor::text("email"), FieldDescriptor::text("name")],
            fail_on: Some("name"),
            calls: Mutex::new(Vec::new()),
        });
        let executor = executor_for(adapter.clone(), false);

        let error = executor
            .call(
                "fill_form_data",
                Some(&json!({ "formData": { "email": "ada@example.test", "name": "Ada" } })),
            )
            .expect_err("mutation fails");

        assert_eq!(error.code, -32603);
        assert!(error.message.contains("name is disabled"));
        let calls = adapter.calls.lock().expect("calls lock");
        assert_eq!(calls.as_slice(), [("email".to_string(), json!("ada@example.test"))]);
    }

    #[test]
    fn malformed_arguments_are_invalid_params() {
        let executor = executor_for(signup_form(), false);
        let error = executor
            .call("fill_form_data", Some(&json!("name=Ada")))
            .expect_err("string arguments");
        assert_eq!(error.code, -32602);

        let error = executor
            .call("fill_form_data", Some(&json!({ "formData": ["Ada"] })))
            .expect_err("array form data");
        assert_eq!(error.code, -32602);
    }

    #[test]
    fn missing_arguments_are_a_no_op_when_lenient() {
        let form = signup_form();
        let executor = executor_for(form.clone(), false);
        executor.call("fill_form_data", None).expect("lenient call");
        assert_eq!(form.value("name"), Some(FieldValue::Text(String::new())));
    }

    #[test]
    fn strict_mode_rejects_before_mutating() {
        let form = signup_form();
        let executor = executor_for(form.clone(), true);

        let error = executor
            .call("fill_form_data", Some(&json!({ "formData": { "name": "Ada" } })))
            .expect_err("newsletter missing");
        assert_eq!(error.code, -32602);
        assert_eq!(error.data, Some(json!({ "missing": ["newsletter"] })));
        assert_eq!(form.value("name"), Some(FieldValue::Text(String::new())));

        executor
            .call(
                "fill_form_data",
                Some(&json!({ "formData": { "name": "Ada", "newsletter": "no" } })),
            )
            .expect("complete arguments");
        assert_eq!(form.value("name"), Some(FieldValue::Text("Ada".into())));
    }
}
