//! Uniform outcome of a tool invocation.

use serde::Serialize;
use serde_json::{Map, Value};

/// Outcome of running a tool: either content or an error message, plus
/// free-form metadata.
///
/// Fields are private so a result cannot change after construction. Build
/// one with [`ToolResult::success_result`] or [`ToolResult::error_result`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    success: bool,
    content: Option<Value>,
    error: Option<String>,
    metadata: Map<String, Value>,
}

impl ToolResult {
    pub fn success_result(content: impl Into<Value>) -> Self {
        Self::success_with_metadata(content, Map::new())
    }

    pub fn success_with_metadata(content: impl Into<Value>, metadata: Map<String, Value>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
            metadata,
        }
    }

    pub fn error_result(error: impl Into<String>) -> Self {
        Self::error_with_metadata(error, Map::new())
    }

    pub fn error_with_metadata(error: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            metadata,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Plain map form: `success` always; `content` or `error` depending on
    /// the outcome; `metadata` only when non-empty.
    pub fn to_dict(&self) -> Value {
        let mut map = Map::new();
        map.insert("success".into(), Value::Bool(self.success));
        if self.success {
            map.insert(
                "content".into(),
                self.content.clone().unwrap_or(Value::Null),
            );
        }
        if let Some(ref error) = self.error {
            map.insert("error".into(), Value::String(error.clone()));
        }
        if !self.metadata.is_empty() {
            map.insert("metadata".into(), Value::Object(self.metadata.clone()));
        }
        Value::Object(map)
    }

    pub fn to_json(&self) -> String {
        self.to_dict().to_string()
    }

    /// Human-readable body used in the tool results message: pretty JSON for
    /// structured content, the raw text for plain strings.
    pub fn display_content(&self) -> String {
        match &self.content {
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
            None => String::new(),
        }
    }
}

impl Serialize for ToolResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_dict().serialize(serializer)
    }
}
