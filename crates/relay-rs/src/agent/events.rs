//! Events emitted by the [`Harness`](super::harness::Harness) and handlers
//! that observe them.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures, e.g. printing stream deltas |
//! | [`CompositeEventHandler`] | Several handlers in order |

use crate::tools::{ToolArgs, ToolResult};
use tracing::{debug, info, trace};

/// Characters of text shown in log previews.
const PREVIEW_CHARS: usize = 200;

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum HarnessEvent<'a> {
    /// A completion-and-tools turn is starting.
    TurnStart { turn: u32, max_turns: u32 },
    /// Full model text for the current completion.
    Text(&'a str),
    /// Incremental text (streaming mode only). After a transport retry the
    /// deltas start over from the beginning of the reply.
    TextDelta(&'a str),
    /// Calls found in the model text this turn, before truncation.
    ToolCallsParsed { turn: u32, count: usize },
    /// More calls were parsed than a turn may execute; the tail was dropped.
    ToolCallsTruncated {
        turn: u32,
        parsed: usize,
        kept: usize,
    },
    ToolExecuting {
        name: &'a str,
        arguments: &'a ToolArgs,
    },
    ToolResult {
        name: &'a str,
        result: &'a ToolResult,
    },
    /// The model answered without requesting tools.
    Finished { turns_used: u32 },
    /// Every turn requested tools; a final answer is being forced.
    TurnLimitReached { max_turns: u32 },
    /// Tools were not exposed, so a single plain completion was made.
    PlainCompletion,
}

/// Observer for harness events.
///
/// ```ignore
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_event(&self, event: &HarnessEvent<'_>) {
///         if let HarnessEvent::TextDelta(delta) = event {
///             print!("{delta}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &HarnessEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&HarnessEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&HarnessEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&HarnessEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &HarnessEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler, in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &HarnessEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &HarnessEvent<'_>) {
        match event {
            HarnessEvent::TurnStart { turn, max_turns } => {
                info!("[turn {turn}/{max_turns}]");
            }
            HarnessEvent::Text(text) => {
                let preview: String = text.chars().take(PREVIEW_CHARS).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.chars().count() > PREVIEW_CHARS { "..." } else { "" }
                );
            }
            HarnessEvent::TextDelta(delta) => {
                trace!("Stream text delta: {delta}");
            }
            HarnessEvent::ToolCallsParsed { turn, count } => {
                debug!("{count} tool call(s) in turn {turn}");
            }
            HarnessEvent::ToolCallsTruncated { turn, parsed, kept } => {
                debug!(
                    "Turn {turn}: executing {kept} of {parsed} tool calls, dropped {}",
                    parsed - kept
                );
            }
            HarnessEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            HarnessEvent::ToolResult { name, result } => {
                if result.success() {
                    debug!("Tool {name} succeeded");
                } else {
                    debug!("Tool {name} failed: {}", result.error().unwrap_or_default());
                }
            }
            HarnessEvent::Finished { turns_used } => {
                info!("Finished after {turns_used} turn(s) (no more tool calls)");
            }
            HarnessEvent::TurnLimitReached { max_turns } => {
                info!("Hit turn limit ({max_turns}), requesting final answer");
            }
            HarnessEvent::PlainCompletion => {
                debug!("No tools exposed, plain completion");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn composite_calls_every_handler_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (seen.clone(), seen.clone());
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| a.lock().unwrap().push("a")))
            .with_if(false, LoggingHandler)
            .with(FnEventHandler::new(move |_| b.lock().unwrap().push("b")));

        handler.on_event(&HarnessEvent::PlainCompletion);
        handler.on_event(&HarnessEvent::Text("hi"));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn logging_handler_accepts_every_event() {
        let result = ToolResult::error_result("boom");
        let args = ToolArgs::new();
        for event in [
            HarnessEvent::TurnStart {
                turn: 1,
                max_turns: 3,
            },
            HarnessEvent::Text("text"),
            HarnessEvent::TextDelta("te"),
            HarnessEvent::ToolCallsParsed { turn: 1, count: 7 },
            HarnessEvent::ToolCallsTruncated {
                turn: 1,
                parsed: 7,
                kept: 5,
            },
            HarnessEvent::ToolExecuting {
                name: "calculator",
                arguments: &args,
            },
            HarnessEvent::ToolResult {
                name: "calculator",
                result: &result,
            },
            HarnessEvent::Finished { turns_used: 2 },
            HarnessEvent::TurnLimitReached { max_turns: 3 },
            HarnessEvent::PlainCompletion,
        ] {
            LoggingHandler.on_event(&event);
        }
    }
}
