//! Typed argument parsing for tool implementations.
//!
//! Calls written in function syntax (`weather(location="Oslo", forecast_days=3)`)
//! arrive with every value as a string, so numeric and boolean fields use
//! the lenient deserializers below, which accept either the native JSON
//! type or its string spelling.

use super::core::ToolArgs;
use crate::error::ToolError;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// Deserialize a tool's argument map into its typed argument struct.
pub fn parse_args<T: DeserializeOwned>(arguments: &ToolArgs) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    String(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    String(String),
}

/// Accept `3`, `3.0` or `"3"` for an optional integer field.
pub fn opt_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let raw: Option<NumberOrString> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected a non-negative integer, got {n}"))),
        Some(NumberOrString::String(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected a non-negative integer, got '{s}'"))),
    }
}

/// Accept `true` or `"true"`/`"false"`/`"yes"`/`"no"`/`"1"`/`"0"`.
pub fn opt_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let raw: Option<BoolOrString> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            other => Err(de::Error::custom(format!("expected a boolean, got '{other}'"))),
        },
    }
}
