//! Error types for the transport and tool layers.
//!
//! [`ApiError`] covers everything that can go wrong talking to the
//! completion endpoint. Only [`ApiError::Auth`] is treated as permanent by
//! the retry wrapper; every other variant is a transport failure and is
//! retried.
//!
//! [`ToolError`] is what a [`Tool`](crate::tools::core::Tool) returns from
//! `execute`. It never escapes a [`ManagedTool`](crate::tools::core::ManagedTool):
//! the message is folded into an error [`ToolResult`](crate::tools::result::ToolResult)
//! that the model gets to see.
//!
//! [`ConfigError`] is returned by [`AppConfig::load`](crate::config::AppConfig::load).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the completion endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid or missing credentials. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Non-success HTTP status other than 401.
    #[error("HTTP error: {status} {body}")]
    Http { status: u16, body: String },

    /// Connection, timeout, or other reqwest-level failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body was not what we expected.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The SSE stream broke off or carried an error payload.
    #[error("stream error: {0}")]
    Stream(String),

    /// The client could not be constructed from its configuration.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Whether this is the non-retryable authentication kind.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }

    /// Whether the retry wrapper should try again after this error.
    pub fn is_retryable(&self) -> bool {
        !self.is_auth()
    }
}

/// Failure inside a single tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error("Tool execution timed out after {:.0} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Rate limit exceeded for tool '{tool}': at most {limit} calls per {window_secs}s")]
    RateLimited {
        tool: String,
        limit: usize,
        window_secs: u64,
    },

    /// An external integration could not be reached or answered badly.
    #[error("{0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn execution(msg: impl Into<String>) -> Self {
        ToolError::Execution(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ToolError::InvalidArguments(msg.into())
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::Unavailable(format!("request failed: {e}"))
    }
}

/// Failure resolving configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
