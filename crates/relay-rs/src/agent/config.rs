//! Configuration for the [`Harness`](super::harness::Harness).
//!
//! ```ignore
//! let config = HarnessConfig::default()
//!     .with_max_turns(4)
//!     .with_max_tools_to_use(3)
//!     .with_streaming(true)
//!     .with_retry(RetryConfig::default().with_max_attempts(5));
//! ```

use crate::ChatOptions;
use crate::api::retry::RetryConfig;

/// Default number of completion-and-tools turns per orchestration call.
pub const DEFAULT_MAX_TURNS: u32 = 3;

/// Default cap on tool calls executed per turn.
pub const DEFAULT_MAX_TOOLS_TO_USE: usize = 5;

/// Settings for one harness.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Turns before the loop forces a final answer. Default: `3`.
    pub max_turns: u32,
    /// Calls executed per turn; extra parsed calls are dropped. Default: `5`.
    pub max_tools_to_use: usize,
    /// Use the streaming transport and emit `TextDelta` events.
    pub streaming: bool,
    /// Retry policy wrapped around every completion.
    pub retry: RetryConfig,
    /// Model and generation overrides passed to the client.
    pub chat: ChatOptions,
    /// Prepend the current date and time to the system prompt.
    pub realtime_context: bool,
    /// For reasoner models, return only the final answer section.
    pub extract_answer_only: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_tools_to_use: DEFAULT_MAX_TOOLS_TO_USE,
            streaming: false,
            retry: RetryConfig::default(),
            chat: ChatOptions::default(),
            realtime_context: false,
            extract_answer_only: false,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values below 1 are raised to 1.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_max_tools_to_use(mut self, max_tools_to_use: usize) -> Self {
        self.max_tools_to_use = max_tools_to_use;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.chat.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.chat.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.chat.temperature = Some(temperature);
        self
    }

    pub fn with_realtime_context(mut self, enabled: bool) -> Self {
        self.realtime_context = enabled;
        self
    }

    pub fn with_extract_answer_only(mut self, enabled: bool) -> Self {
        self.extract_answer_only = enabled;
        self
    }
}
