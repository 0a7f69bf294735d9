//! Memory content payloads.
//!
//! Turns arrive either as plain text or as structured JSON. Both feed the
//! same token counter and embedding path, so a single canonical text
//! rendering is defined here and used everywhere.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content of a memory item: raw text or a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryContent {
    Text(String),
    Structured(Value),
}

impl MemoryContent {
    /// Create text content.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Create structured content from a JSON value.
    pub fn structured(value: Value) -> Self {
        Self::Structured(value)
    }

    /// Render to the canonical text form used for token counting and
    /// embedding.
    ///
    /// Text content is returned verbatim. Structured objects are flattened
    /// into `key: value` pairs joined by `; ` (keys in stable order); nested
    /// values fall back to compact JSON.
    pub fn render(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Structured(value) => render_value(value),
        }
    }

    /// True when the rendered form would be empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Structured(Value::Null) => true,
            Self::Structured(Value::Object(map)) => map.is_empty(),
            Self::Structured(_) => false,
        }
    }
}

impl From<String> for MemoryContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for MemoryContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Value> for MemoryContent {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            other => Self::Structured(other),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, render_scalar(v)))
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
