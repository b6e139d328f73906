//! Tool catalog derived from the adapter's current field set.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;

use crate::{
    adapter::{FieldDescriptor, FieldKind, ResourceAdapter},
    context::BridgeContext,
};

pub const FILL_FORM_TOOL: &str = "fill_form_data";
pub const FORM_DATA_ARGUMENT: &str = "formData";

/// Tools the bridge knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    FillFormData,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 1] = [BuiltinTool::FillFormData];

    pub fn name(self) -> &'static str {
        match self {
            Self::FillFormData => FILL_FORM_TOOL,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            Self::FillFormData => {
                "Fill in the form on the current page. Pass the values to enter as `formData`, \
                 keyed by field id. Fields left out keep their current value."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub kind: SchemaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl Schema {
    fn object(properties: BTreeMap<String, Schema>, required: Vec<String>) -> Self {
        Self {
            kind: SchemaType::Object,
            description: None,
            properties: Some(properties),
            required: Some(required),
        }
    }

    fn string(description: String) -> Self {
        Self {
            kind: SchemaType::String,
            description: Some(description),
            properties: None,
            required: None,
        }
    }

    fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
}

impl ToolDefinition {
    /// Field ids the nested `formData` object declares required.
    pub fn required_fields(&self) -> &[String] {
        self.input_schema
            .properties
            .as_ref()
            .and_then(|properties| properties.get(FORM_DATA_ARGUMENT))
            .and_then(|form_data| form_data.required.as_deref())
            .unwrap_or(&[])
    }
}

#[derive(Clone)]
pub struct CapabilityRegistry {
    adapter: Arc<dyn ResourceAdapter>,
}

impl CapabilityRegistry {
    pub fn new(ctx: &BridgeContext) -> Self {
        Self {
            adapter: ctx.adapter().clone(),
        }
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let fields = self.adapter.describe();
        BuiltinTool::ALL
            .into_iter()
            .map(|tool| build_definition(tool, &fields))
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<(BuiltinTool, ToolDefinition)> {
        let tool = BuiltinTool::from_name(name)?;
        let fields = self.adapter.describe();
        Some((tool, build_definition(tool, &fields)))
    }
}

fn build_definition(tool: BuiltinTool, fields: &[FieldDescriptor]) -> ToolDefinition {
    let input_schema = match tool {
        BuiltinTool::FillFormData => {
            // Every field id is listed once, including optional ones. The
            // first descriptor for a repeated id wins.
            let mut properties = BTreeMap::new();
            let mut required = Vec::new();
            for field in fields {
                if properties.contains_key(&field.id) {
                    tracing::debug!(field = %field.id, "ignoring repeated field id");
                    continue;
                }
                properties.insert(field.id.clone(), Schema::string(describe_field(field)));
                required.push(field.id.clone());
            }
            let form_data = Schema::object(properties, required)
                .described("Values to enter, keyed by field id");

            let mut root = BTreeMap::new();
            root.insert(FORM_DATA_ARGUMENT.to_string(), form_data);
            Schema::object(root, vec![FORM_DATA_ARGUMENT.to_string()])
        }
    };

    ToolDefinition {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        input_schema,
    }
}

fn describe_field(field: &FieldDescriptor) -> String {
    let label = if field.label.trim().is_empty() {
        field.name.as_str()
    } else {
        field.label.trim()
    };
    let mut description = label.to_string();

    let options = || {
        field
            .options
            .iter()
            .map(|option| {
                if option.text.is_empty() || option.text == option.value {
                    option.value.clone()
                } else {
                    format!("{} ({})", option.value, option.text)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    match field.kind {
        FieldKind::Text => {}
        FieldKind::Boolean => description.push_str(" (true or false)"),
        FieldKind::SingleChoice => {
            description.push_str(&format!(" (one of: {})", options()));
        }
        FieldKind::MultiChoice => {
            description.push_str(&format!(" (comma-separated, any of: {})", options()));
        }
    }
    if field.kind.is_enumerated() && field.options.is_empty() {
        description.push_str(" [no options available]");
    }
    if field.required {
        description.push_str(" [required by the form]");
    }

    description
}
