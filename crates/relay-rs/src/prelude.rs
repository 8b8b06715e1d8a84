//! Convenience re-exports for common `relay-rs` types.
//!
//! ```ignore
//! use relay_rs::prelude::*;
//! ```
//!
//! Covers the client, messages, the harness and its config, events, the
//! tool trait and registry, and configuration loading. Built-in tools and
//! parser internals are imported from their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ChatClient, ChatOptions, CompletionClient, Message, MessageRole, ToolDef, json_schema_for,
};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    CompositeEventHandler, EventHandler, FnEventHandler, Harness, HarnessConfig, HarnessEvent,
    LoggingHandler, NoopHandler, RunOptions, ToolChoice, ToolRunOutcome, ToolUsage,
};

// ── Transport ───────────────────────────────────────────────────────
pub use crate::api::RetryConfig;

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, ManagedTool, Tool, ToolArgs, ToolFuture, ToolRegistry, ToolResult};

// ── Configuration and errors ────────────────────────────────────────
pub use crate::config::AppConfig;
pub use crate::error::{ApiError, ConfigError, ToolError};
