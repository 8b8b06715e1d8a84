//! Text-embedded tool calling and multi-turn orchestration over chat
//! completion APIs.
//!
//! `relay-rs` sits on top of an OpenAI-compatible `POST /chat/completions`
//! endpoint (DeepSeek by default) whose models have no native tool-call
//! channel. Tools are advertised in the system prompt, the model writes calls
//! into its prose, and the [`Harness`](agent::harness::Harness) parses them,
//! runs them, and feeds the results back for a bounded number of turns.
//!
//! # Getting started
//!
//! ```ignore
//! use relay_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load(None)?;
//!     let client = ChatClient::new(&config.client)?;
//!     let registry = ToolRegistry::with_defaults(&config.tools);
//!
//!     let messages = vec![
//!         Message::system("You are a helpful assistant."),
//!         Message::user("What is 17 * 23, and what day is it today?"),
//!     ];
//!
//!     let outcome = Harness::new(&client, &registry, HarnessConfig::default())
//!         .with_event_handler(&LoggingHandler)
//!         .run(&messages, RunOptions::default())
//!         .await?;
//!
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Define tools:** the [`Tool`](tools::core::Tool) trait, or
//!   [`FnTool`](tools::core::FnTool) for closures. Register them on a
//!   [`ToolRegistry`](tools::registry::ToolRegistry).
//! - **Parse calls out of model text:** [`tools::parser`].
//! - **Run the loop:** [`Harness`](agent::harness::Harness) with
//!   [`HarnessConfig`](agent::config::HarnessConfig) and
//!   [`RunOptions`](agent::harness::RunOptions).
//! - **Observe the loop:** implement [`EventHandler`](agent::events::EventHandler).
//! - **Retries and streaming:** [`api::retry`] and [`api::streaming`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Orchestration loop, config, events, prompt assembly, answer extraction |
//! | [`tools`] | Tool trait, cache, registry, call parser, built-in tools |
//! | [`api`] | Retry with backoff, SSE streaming |
//! | [`config`] | JSON file plus environment configuration |
//! | [`error`] | [`ApiError`](error::ApiError), [`ToolError`](error::ToolError), [`ConfigError`](error::ConfigError) |

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod prelude;
pub mod tools;

use crate::api::retry::{RetryConfig, retry};
use crate::config::ClientConfig;
use crate::error::ApiError;
use futures::Stream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// Re-export schemars for downstream tool definitions.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default API base URL. `/chat/completions` is appended.
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Default model for all completions.
pub const DEFAULT_MODEL: &str = "deepseek-chat";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema object from a `schemars::JsonSchema` type.
///
/// The `$schema` and `title` keys are dropped; the schema is pasted into the
/// system prompt, where they are noise.
///
/// ```
/// use relay_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs {
///     id: String,
///     #[serde(default)]
///     verbose: Option<bool>,
/// }
///
/// let schema = json_schema_for::<LookupArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"id".into()));
/// assert!(schema.get("title").is_none());
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

// ── Tool definitions ───────────────────────────────────────────────

/// A tool's exported schema: name, description, and a JSON Schema object
/// for its parameters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names listed in the schema's `required` array.
    pub fn required_params(&self) -> Vec<String> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// ── Request types ──────────────────────────────────────────────────

/// Per-call overrides of the client's generation defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Chat completion request body.
#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    #[serde(default)]
    choices: Vec<RawChoice>,
    error: Option<RawErrorBody>,
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawErrorBody {
    message: String,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Completion client abstraction ──────────────────────────────────

/// Incremental text fragments of a streamed completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

/// Boxed future returned by [`CompletionClient`] methods.
pub type CompletionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// The transport the orchestration loop talks to.
///
/// One attempt per call: retries are layered on top by
/// [`api::retry`]. [`ChatClient`] is the HTTP implementation; tests use
/// scripted mocks.
pub trait CompletionClient: Send + Sync {
    /// Send the conversation and return the assistant's text.
    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a ChatOptions,
    ) -> CompletionFuture<'a, String>;

    /// Send the conversation and stream the assistant's text as it arrives.
    fn complete_stream<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a ChatOptions,
    ) -> CompletionFuture<'a, TextStream>;

    /// The model used when [`ChatOptions::model`] is unset.
    fn model(&self) -> &str;
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryConfig,
}

impl ChatClient {
    /// Build a client from resolved configuration. Fails without an API key.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ApiError::Config(
                    "API key not found. Set DEEPSEEK_API_KEY or add it to the config file."
                        .into(),
                )
            })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("relay-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            retry: config.retry_config(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    fn request<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a ChatOptions,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            messages,
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            temperature: options.temperature.unwrap_or(self.temperature),
            stream,
        }
    }

    /// POST the body and map non-success statuses onto [`ApiError`].
    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, ApiError> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}, stream={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
            body.stream,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth("Invalid or missing API key.".into()));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(resp)
    }

    /// One non-streaming completion attempt.
    pub async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<String, ApiError> {
        let body = self.request(messages, options, false);
        let start = Instant::now();
        let resp = self.send(&body).await?;
        let text = resp.text().await?;
        debug!(
            "LLM response in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| ApiError::Decode(format!("failed to parse response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(ApiError::Decode(format!("API error: {}", err.message)));
        }
        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Decode("response contained no choices".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }

    /// One streaming completion attempt.
    pub async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<TextStream, ApiError> {
        let body = self.request(messages, options, true);
        let resp = self.send(&body).await?;
        Ok(api::streaming::text_stream(resp))
    }

    /// Single-prompt completion with retry.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, ApiError> {
        let messages = [Message::user(prompt)];
        self.chat_completion(&messages).await
    }

    /// Full-conversation completion with retry.
    pub async fn chat_completion(&self, messages: &[Message]) -> Result<String, ApiError> {
        let options = ChatOptions::default();
        retry(&self.retry, || self.chat(messages, &options)).await
    }
}

impl CompletionClient for ChatClient {
    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a ChatOptions,
    ) -> CompletionFuture<'a, String> {
        Box::pin(self.chat(messages, options))
    }

    fn complete_stream<'a>(
        &'a self,
        messages: &'a [Message],
        options: &'a ChatOptions,
    ) -> CompletionFuture<'a, TextStream> {
        Box::pin(self.chat_stream(messages, options))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
