use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;

use crate::adapter::{
    AdapterError, FieldDescriptor, FieldKind, FieldOption, ResourceAdapter, ResourceLocation,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Choice(Option<String>),
    Choices(Vec<String>),
}

impl FieldValue {
    fn empty(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Text => Self::Text(String::new()),
            FieldKind::Boolean => Self::Flag(false),
            FieldKind::SingleChoice => Self::Choice(None),
            FieldKind::MultiChoice => Self::Choices(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FormEntry {
    pub field: FieldDescriptor,
    pub value: FieldValue,
}

/// Form held entirely in memory. Backs the demo binary and the tests.
pub struct MemoryForm {
    location: ResourceLocation,
    entries: Mutex<Vec<FormEntry>>,
}

impl MemoryForm {
    /// A repeated id keeps its first position and its last descriptor, the
    /// same as calling [`MemoryForm::add_field`] for each field in turn.
    pub fn new(location: ResourceLocation, fields: Vec<FieldDescriptor>) -> Self {
        let mut entries = Vec::with_capacity(fields.len());
        for field in fields {
            upsert(&mut entries, field);
        }
        Self {
            location,
            entries: Mutex::new(entries),
        }
    }

    /// Adds a field, or replaces the descriptor of an existing one with the
    /// same id while resetting its value.
    pub fn add_field(&self, field: FieldDescriptor) {
        upsert(&mut self.lock(), field);
    }

    pub fn remove_field(&self, field_id: &str) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| entry.field.id != field_id);
        entries.len() != before
    }

    pub fn value(&self, field_id: &str) -> Option<FieldValue> {
        self.lock()
            .iter()
            .find(|entry| entry.field.id == field_id)
            .map(|entry| entry.value.clone())
    }

    pub fn snapshot(&self) -> Vec<FormEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FormEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResourceAdapter for MemoryForm {
    fn describe(&self) -> Vec<FieldDescriptor> {
        self.lock().iter().map(|entry| entry.field.clone()).collect()
    }

    fn set(&self, field_id: &str, value: &Value) -> Result<(), AdapterError> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.field.id == field_id)
            .ok_or_else(|| AdapterError::UnknownField(field_id.to_string()))?;

        entry.value = coerce(&entry.field, value)?;
        Ok(())
    }

    fn location(&self) -> ResourceLocation {
        self.location.clone()
    }
}

fn upsert(entries: &mut Vec<FormEntry>, field: FieldDescriptor) {
    let value = FieldValue::empty(field.kind);
    match entries.iter_mut().find(|entry| entry.field.id == field.id) {
        Some(entry) => *entry = FormEntry { field, value },
        None => entries.push(FormEntry { field, value }),
    }
}

fn coerce(field: &FieldDescriptor, value: &Value) -> Result<FieldValue, AdapterError> {
    let invalid = |reason: String| AdapterError::InvalidValue {
        field: field.id.clone(),
        reason,
    };

    match field.kind {
        FieldKind::Text => match value {
            Value::String(text) => Ok(FieldValue::Text(text.clone())),
            Value::Number(number) => Ok(FieldValue::Text(number.to_string())),
            Value::Bool(flag) => Ok(FieldValue::Text(flag.to_string())),
            Value::Null => Ok(FieldValue::Text(String::new())),
            _ => Err(invalid("expected a string".to_string())),
        },
        FieldKind::Boolean => match value {
            Value::Bool(flag) => Ok(FieldValue::Flag(*flag)),
            Value::String(raw) => parse_flag(raw)
                .map(FieldValue::Flag)
                .ok_or_else(|| invalid(format!("expected true or false, got {raw:?}"))),
            _ => Err(invalid("expected true or false".to_string())),
        },
        FieldKind::SingleChoice => match value {
            Value::Null => Ok(FieldValue::Choice(None)),
            Value::String(raw) if raw.trim().is_empty() => Ok(FieldValue::Choice(None)),
            Value::String(raw) => match_option(&field.options, raw)
                .map(|option| FieldValue::Choice(Some(option.value.clone())))
                .ok_or_else(|| invalid(format!("{raw:?} is not one of the options"))),
            _ => Err(invalid("expected an option value".to_string())),
        },
        FieldKind::MultiChoice => {
            let raw_items: Vec<String> = match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(text) => Ok(text.clone()),
                        other => Err(invalid(format!("expected option strings, got {other}"))),
                    })
                    .collect::<Result<_, _>>()?,
                Value::String(raw) => raw
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
                Value::Null => Vec::new(),
                _ => return Err(invalid("expected a list of option values".to_string())),
            };

            let mut selected = Vec::with_capacity(raw_items.len());
            for raw in &raw_items {
                let option = match_option(&field.options, raw)
                    .ok_or_else(|| invalid(format!("{raw:?} is not one of the options")))?;
                if !selected.contains(&option.value) {
                    selected.push(option.value.clone());
                }
            }
            Ok(FieldValue::Choices(selected))
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "checked" => Some(true),
        "false" | "no" | "off" | "0" | "" => Some(false),
        _ => None,
    }
}

fn match_option<'a>(options: &'a [FieldOption], raw: &str) -> Option<&'a FieldOption> {
    let raw = raw.trim();
    options
        .iter()
        .find(|option| option.value == raw)
        .or_else(|| {
            options
                .iter()
                .find(|option| option.text.eq_ignore_ascii_case(raw))
        })
}
