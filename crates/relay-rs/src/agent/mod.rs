//! The orchestration loop and its supporting pieces.
//!
//! - [`harness::Harness`]: the tool-augmented chat loop. Start here.
//! - [`config::HarnessConfig`]: turn budget, per-turn call cap, streaming,
//!   retry policy and generation overrides.
//! - [`events`]: [`EventHandler`] and [`HarnessEvent`] for observing a run.
//! - [`prompt`]: tool instructions, the results message, real-time context.
//! - [`answer`]: final-answer extraction for reasoner models.

pub mod answer;
pub mod config;
pub mod events;
pub mod harness;
pub mod prompt;

pub use config::HarnessConfig;
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, HarnessEvent, LoggingHandler,
    NoopHandler,
};
pub use harness::{Harness, RunOptions, ToolChoice, ToolRunOutcome, ToolUsage};
