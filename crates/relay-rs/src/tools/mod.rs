//! Tools the model can invoke by writing calls into its reply text.
//!
//! Every capability is a [`Tool`] implementor. A [`ManagedTool`] wraps one
//! with argument checks, a TTL result cache, an optional rate limit and a
//! timeout; a [`ToolRegistry`] maps names to managed tools and dispatches.
//! The [`parser`] turns reply text into calls.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`], [`ManagedTool`], [`FnTool`], [`ToolStats`].
//! - [`registry`]: [`ToolRegistry`]; [`ToolRegistry::with_defaults`]
//!   registers the built-ins.
//! - [`parser`]: [`TextCallParser`] for fenced JSON and function syntax.
//! - [`result`], [`cache`], [`rate_limit`], [`args`]: supporting types.
//! - Built-ins: [`calculator`], [`datetime`], [`weather`], [`search`],
//!   [`knowledge`], [`email`].

pub mod args;
pub mod cache;
pub mod calculator;
pub mod core;
pub mod datetime;
pub mod email;
pub mod knowledge;
pub mod parser;
pub mod rate_limit;
pub mod registry;
pub mod result;
pub mod search;
pub mod weather;

pub use cache::{Clock, DEFAULT_CACHE_TTL, ManualClock, SystemClock};
pub use core::{FnTool, ManagedTool, Tool, ToolArgs, ToolFuture, ToolStats};
pub use parser::{CallParser, ParsedCall, TextCallParser};
pub use rate_limit::RateLimit;
pub use registry::ToolRegistry;
pub use result::ToolResult;

use std::time::Duration;
use tracing::warn;

/// Per-request timeout for the HTTP-backed built-ins.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared client settings for the HTTP-backed built-ins.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("relay-rs/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!("Falling back to a default HTTP client: {e}");
            reqwest::Client::new()
        })
}
