//! The seam between the bridge and whatever local resource it edits.
//!
//! The embedding application owns the resource and hands the bridge an
//! `Arc<dyn ResourceAdapter>`. The capability registry only ever calls
//! [`ResourceAdapter::describe`]; [`ResourceAdapter::set`] is reserved for
//! the tool executor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    Text,
    SingleChoice,
    MultiChoice,
    Boolean,
}

impl FieldKind {
    pub fn is_enumerated(self) -> bool {
        matches!(self, Self::SingleChoice | Self::MultiChoice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    pub text: String,
}

impl FieldOption {
    pub fn new(value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
}

impl FieldDescriptor {
    pub fn new(id: impl Into<String>, kind: FieldKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            label: id.clone(),
            id,
            kind,
            required: false,
            options: Vec::new(),
        }
    }

    pub fn text(id: impl Into<String>) -> Self {
        Self::new(id, FieldKind::Text)
    }

    pub fn boolean(id: impl Into<String>) -> Self {
        Self::new(id, FieldKind::Boolean)
    }

    pub fn single_choice(id: impl Into<String>, options: Vec<FieldOption>) -> Self {
        Self::new(id, FieldKind::SingleChoice).with_options(options)
    }

    pub fn multi_choice(id: impl Into<String>, options: Vec<FieldOption>) -> Self {
        Self::new(id, FieldKind::MultiChoice).with_options(options)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_options(mut self, options: Vec<FieldOption>) -> Self {
        self.options = options;
        self
    }
}

/// Where the resource lives, reported to the agent alongside each prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLocation {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("resource unavailable: {0}")]
    Unavailable(String),
}

pub trait ResourceAdapter: Send + Sync {
    /// Current field set. Called on every discovery; must not be cached by
    /// the caller.
    fn describe(&self) -> Vec<FieldDescriptor>;

    /// Applies `value` to the field identified by `field_id`.
    fn set(&self, field_id: &str, value: &Value) -> Result<(), AdapterError>;

    fn location(&self) -> ResourceLocation {
        ResourceLocation::default()
    }
}
