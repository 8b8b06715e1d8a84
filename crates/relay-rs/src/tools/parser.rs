//! Extraction of tool-call intents from free-form model text.
//!
//! The model has no native tool-call channel, so calls are embedded in its
//! prose using one of two conventions:
//!
//! 1. A fenced JSON block holding exactly `{"name": ..., "arguments": {...}}`:
//!
//!    ````text
//!    ```json
//!    {"name": "date_time", "arguments": {"timezone": "UTC"}}
//!    ```
//!    ````
//!
//! 2. Function syntax: `weather(location="Oslo", units='metric', forecast_days=3)`.
//!    A tool without arguments may be written `date_time()`.
//!
//! [`TextCallParser`] applies both and concatenates the results: every
//! fenced-JSON call first, then every function-syntax call, each group in
//! text order. Duplicates are kept.
//!
//! # Known quirk: no numeric coercion
//!
//! Function-syntax values are always strings. `forecast_days=3` yields
//! `{"forecast_days": "3"}`, not the number `3`. Tools that take numbers
//! must accept their string spelling (see [`crate::tools::args`]).

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

/// ```json ... ``` blocks (tag is case-insensitive).
static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```json\b[ \t]*\r?\n?(.*?)```").expect("valid regex"));

/// Any fenced block, with or without a language tag.
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n`]*\n?(.*?)```").expect("valid regex"));

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_]*";
const VALUE: &str = r#""[^"]*"|'[^']*'|-?\d+(?:\.\d+)?"#;

/// `identifier(key=value, ...)` with the argument list fully consumed, or
/// `identifier()`. Group 2 is absent for the empty form.
static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    let pair = format!(r"{IDENT}\s*=\s*(?:{VALUE})");
    Regex::new(&format!(
        r"\b({IDENT})\(\s*(?:({pair}(?:\s*,\s*{pair})*)\s*,?\s*)?\)"
    ))
    .expect("valid regex")
});

/// One `key=value` pair; groups 2..=4 are the three value spellings.
static ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"({IDENT})\s*=\s*(?:"([^"]*)"|'([^']*)'|(-?\d+(?:\.\d+)?))"#
    ))
    .expect("valid regex")
});

/// A call intent extracted from model text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ParsedCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Turns model output into call intents.
///
/// The orchestration loop only depends on this trait, so a model with
/// native structured tool calls can swap in a different implementation.
pub trait CallParser: Send + Sync {
    fn parse(&self, text: &str) -> Vec<ParsedCall>;
}

/// Parser for the fenced-JSON and function-syntax conventions.
///
/// An empty call like `date_time()` is only taken as a call when the name
/// is a tool the parser was told about (see [`with_bare_calls_for`] and
/// [`with_known_tools`]), so prose such as `main()` is left alone.
///
/// [`with_bare_calls_for`]: TextCallParser::with_bare_calls_for
/// [`with_known_tools`]: TextCallParser::with_known_tools
#[derive(Debug, Clone, Default)]
pub struct TextCallParser {
    known_tools: Option<HashSet<String>>,
    bare_call_tools: HashSet<String>,
}

impl TextCallParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only return calls whose name is in `names`.
    pub fn with_known_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_tools = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Accept `name()` with no arguments for these names.
    pub fn with_bare_calls_for<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bare_call_tools.extend(names.into_iter().map(Into::into));
        self
    }

    fn accepts_bare_call(&self, name: &str) -> bool {
        self.bare_call_tools.contains(name)
            || self
                .known_tools
                .as_ref()
                .is_some_and(|known| known.contains(name))
    }

    fn is_known(&self, name: &str) -> bool {
        self.known_tools
            .as_ref()
            .is_none_or(|known| known.contains(name))
    }

    /// Calls written as fenced JSON blocks, in text order.
    pub fn parse_fenced_json(&self, text: &str) -> Vec<ParsedCall> {
        let mut calls = Vec::new();
        for caps in FENCED_JSON.captures_iter(text) {
            let body = caps.get(1).map_or("", |m| m.as_str()).trim();
            let value: Value = match serde_json::from_str(body) {
                Ok(v) => v,
                Err(e) => {
                    debug!("Skipping malformed JSON block: {e}");
                    continue;
                }
            };
            let Some(call) = call_from_json(value) else {
                continue;
            };
            if self.is_known(&call.name) {
                calls.push(call);
            }
        }
        calls
    }

    /// Calls written as `name(key="value", ...)`, in text order, skipping
    /// any whose name appears inside a fenced code block.
    pub fn parse_function_syntax(&self, text: &str) -> Vec<ParsedCall> {
        let fence_bodies: Vec<&str> = ANY_FENCE
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        let mut calls = Vec::new();
        for caps in FUNCTION_CALL.captures_iter(text) {
            let Some(name) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let args = caps.get(2).map(|m| m.as_str());
            if args.is_none() && !self.accepts_bare_call(name) {
                continue;
            }
            if fence_bodies
                .iter()
                .any(|body| contains_word(body, name))
            {
                debug!("Skipping {name}(...): name appears in a code block");
                continue;
            }
            if !self.is_known(name) {
                continue;
            }
            calls.push(ParsedCall::new(name, args.map(parse_arguments).unwrap_or_default()));
        }
        calls
    }
}

impl CallParser for TextCallParser {
    fn parse(&self, text: &str) -> Vec<ParsedCall> {
        let mut calls = self.parse_fenced_json(text);
        calls.extend(self.parse_function_syntax(text));
        if !calls.is_empty() {
            debug!("Parsed {} tool call(s) from model output", calls.len());
        }
        calls
    }
}

/// `{"name": string, "arguments": object}` and nothing else.
fn call_from_json(value: Value) -> Option<ParsedCall> {
    let Value::Object(mut obj) = value else {
        return None;
    };
    if obj.len() != 2 {
        return None;
    }
    let name = match obj.remove("name")? {
        Value::String(s) => s,
        _ => return None,
    };
    match obj.remove("arguments")? {
        Value::Object(arguments) => Some(ParsedCall { name, arguments }),
        _ => None,
    }
}

/// Each value is the first non-empty spelling, kept as a string.
fn parse_arguments(args: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for caps in ARGUMENT.captures_iter(args) {
        let Some(key) = caps.get(1) else { continue };
        let value = (2..=4)
            .filter_map(|i| caps.get(i))
            .map(|m| m.as_str())
            .find(|s| !s.is_empty())
            .unwrap_or("");
        map.insert(key.as_str().to_string(), Value::String(value.to_string()));
    }
    map
}

/// Whether `word` occurs in `haystack` with no identifier characters on
/// either side.
fn contains_word(haystack: &str, word: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack.get(..start).and_then(|s| s.chars().next_back());
        let after = haystack.get(start + word.len()..).and_then(|s| s.chars().next());
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}
