//! The tool-augmented chat loop.
//!
//! The [`Harness`] sends the conversation to the model, parses the reply
//! for text-embedded tool calls, executes them through the
//! [`ToolRegistry`], and feeds the results back as a user message. It
//! repeats until the model answers without calling tools or the turn
//! budget runs out.
//!
//! A turn budget of `max_turns` bounds the number of completions: the
//! completion made on turn `max_turns` is the final answer and is never
//! parsed for calls.

use super::answer::process_model_response;
use super::config::HarnessConfig;
use super::events::{EventHandler, HarnessEvent, NoopHandler};
use super::prompt::{format_tool_results, inject_tool_instructions, prepend_realtime_context};
use crate::api::retry::{retry, retry_stream};
use crate::error::ApiError;
use crate::tools::core::{ManagedTool, Tool, ToolArgs};
use crate::tools::parser::{CallParser, TextCallParser};
use crate::tools::registry::ToolRegistry;
use crate::{CompletionClient, Message};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

// ── Options and outcome ────────────────────────────────────────────

/// Whether the model may call tools on this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    /// Plain completion; no tool instructions are injected.
    None,
}

/// Per-call settings for [`Harness::run`].
#[derive(Clone, Default)]
pub struct RunOptions {
    pub tool_choice: ToolChoice,
    /// Registered for this call only and removed when it returns.
    pub transient_tools: Vec<Arc<dyn Tool>>,
    pub max_turns: Option<u32>,
    pub max_tools_to_use: Option<usize>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transient: Vec<String> = self.transient_tools.iter().map(|t| t.name()).collect();
        f.debug_struct("RunOptions")
            .field("tool_choice", &self.tool_choice)
            .field("transient_tools", &transient)
            .field("max_turns", &self.max_turns)
            .field("max_tools_to_use", &self.max_tools_to_use)
            .finish()
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_transient_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.transient_tools.push(Arc::new(tool));
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_max_tools_to_use(mut self, max_tools_to_use: usize) -> Self {
        self.max_tools_to_use = Some(max_tools_to_use);
        self
    }
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUsage {
    pub turn: u32,
    pub tool: String,
    pub arguments: ToolArgs,
}

/// What a [`Harness::run`] produced.
#[derive(Debug, Clone)]
pub struct ToolRunOutcome {
    /// The final model text.
    pub text: String,
    /// Every executed call, in execution order.
    pub tool_usage: Vec<ToolUsage>,
    pub turns_used: u32,
    /// Logical completions made; transport retries are not counted.
    pub completion_calls: u32,
}

impl ToolRunOutcome {
    pub fn into_parts(self) -> (String, Vec<ToolUsage>) {
        (self.text, self.tool_usage)
    }
}

// ── Transient tools ────────────────────────────────────────────────

/// Removes per-call tools from the registry when dropped, on every exit
/// path, and puts back any registered tools they shadowed.
struct TransientGuard<'r> {
    registry: &'r ToolRegistry,
    names: Vec<String>,
    shadowed: Vec<Arc<ManagedTool>>,
}

impl<'r> TransientGuard<'r> {
    fn register(registry: &'r ToolRegistry, tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut names: Vec<String> = Vec::with_capacity(tools.len());
        let mut shadowed = Vec::new();
        for tool in tools {
            let managed = ManagedTool::from_arc(tool);
            let name = managed.name().to_string();
            if !names.contains(&name) {
                if let Some(existing) = registry.get(&name) {
                    shadowed.push(existing);
                }
                names.push(name);
            }
            registry.register_managed(managed);
        }
        Self {
            registry,
            names,
            shadowed,
        }
    }
}

impl Drop for TransientGuard<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            self.registry.unregister(name);
        }
        for tool in self.shadowed.drain(..) {
            self.registry.register_shared(tool);
        }
    }
}

// ── Harness ────────────────────────────────────────────────────────

/// The orchestration loop.
///
/// ```ignore
/// let client = ChatClient::new(&config.client)?;
/// let tools = ToolRegistry::with_defaults(&config.tools);
/// let handler = LoggingHandler;
///
/// let outcome = Harness::new(&client, &tools, HarnessConfig::default())
///     .with_event_handler(&handler)
///     .run(&[Message::user("What is 17 * 23?")], RunOptions::default())
///     .await?;
/// println!("{}", outcome.text);
/// ```
///
/// The harness borrows the client, registry and handler; bind them to
/// `let`s that outlive `.run()`. The caller's messages are copied, never
/// modified.
pub struct Harness<'a> {
    client: &'a dyn CompletionClient,
    tools: &'a ToolRegistry,
    config: HarnessConfig,
    event_handler: &'a dyn EventHandler,
    parser: Option<Box<dyn CallParser>>,
}

impl<'a> Harness<'a> {
    pub fn new(
        client: &'a dyn CompletionClient,
        tools: &'a ToolRegistry,
        config: HarnessConfig,
    ) -> Self {
        Self {
            client,
            tools,
            config,
            event_handler: &NoopHandler,
            parser: None,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Replace the default [`TextCallParser`], which accepts empty
    /// `name()` calls for every tool registered when a run starts.
    pub fn with_parser(mut self, parser: Box<dyn CallParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn emit(&self, event: HarnessEvent<'_>) {
        self.event_handler.on_event(&event);
    }

    /// Run the loop over a copy of `messages`.
    ///
    /// Transport failures are returned as `Err`. Tool failures never are:
    /// the model sees them in the results message and the loop continues.
    pub async fn run(
        &self,
        messages: &[Message],
        options: RunOptions,
    ) -> Result<ToolRunOutcome, ApiError> {
        let max_turns = options.max_turns.unwrap_or(self.config.max_turns).max(1);
        let max_tools = options
            .max_tools_to_use
            .unwrap_or(self.config.max_tools_to_use);

        let mut conversation = messages.to_vec();
        if self.config.realtime_context {
            prepend_realtime_context(&mut conversation, Utc::now());
        }

        let tools_exposed = !self.tools.is_empty() || !options.transient_tools.is_empty();
        if options.tool_choice == ToolChoice::None || !tools_exposed {
            self.emit(HarnessEvent::PlainCompletion);
            let text = self.complete(&conversation).await?;
            self.emit(HarnessEvent::Text(&text));
            return Ok(ToolRunOutcome {
                text: self.finalize(text),
                tool_usage: Vec::new(),
                turns_used: 1,
                completion_calls: 1,
            });
        }

        let _transient = TransientGuard::register(self.tools, options.transient_tools);
        inject_tool_instructions(&mut conversation, &self.tools.schemas());

        // Empty `name()` calls are accepted for the tools registered for this run.
        let default_parser;
        let parser: &dyn CallParser = match &self.parser {
            Some(parser) => parser.as_ref(),
            None => {
                default_parser = TextCallParser::new().with_bare_calls_for(self.tools.list_names());
                &default_parser
            }
        };

        let mut tool_usage = Vec::new();
        let mut turn = 0;
        loop {
            turn += 1;
            self.emit(HarnessEvent::TurnStart { turn, max_turns });
            if turn == max_turns && turn > 1 {
                self.emit(HarnessEvent::TurnLimitReached { max_turns });
            }

            let text = self.complete(&conversation).await?;
            self.emit(HarnessEvent::Text(&text));

            let outcome = |text: String, tool_usage: Vec<ToolUsage>| ToolRunOutcome {
                text: self.finalize(text),
                tool_usage,
                turns_used: turn,
                completion_calls: turn,
            };

            if turn == max_turns {
                return Ok(outcome(text, tool_usage));
            }

            let mut calls = parser.parse(&text);
            if calls.is_empty() {
                self.emit(HarnessEvent::Finished { turns_used: turn });
                return Ok(outcome(text, tool_usage));
            }
            self.emit(HarnessEvent::ToolCallsParsed {
                turn,
                count: calls.len(),
            });
            if calls.len() > max_tools {
                let dropped: Vec<&str> = calls[max_tools..].iter().map(|c| c.name.as_str()).collect();
                debug!(
                    "Turn {turn}: dropping {} call(s) over the limit of {max_tools}: {}",
                    dropped.len(),
                    dropped.join(", ")
                );
                self.emit(HarnessEvent::ToolCallsTruncated {
                    turn,
                    parsed: calls.len(),
                    kept: max_tools,
                });
                calls.truncate(max_tools);
            }
            if calls.is_empty() {
                self.emit(HarnessEvent::Finished { turns_used: turn });
                return Ok(outcome(text, tool_usage));
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                self.emit(HarnessEvent::ToolExecuting {
                    name: &call.name,
                    arguments: &call.arguments,
                });
                let result = self.tools.run(&call.name, &call.arguments).await;
                self.emit(HarnessEvent::ToolResult {
                    name: &call.name,
                    result: &result,
                });
                tool_usage.push(ToolUsage {
                    turn,
                    tool: call.name.clone(),
                    arguments: call.arguments,
                });
                results.push((call.name, result));
            }
            info!("Turn {turn}: executed {} tool call(s)", results.len());

            conversation.push(Message::assistant(text));
            conversation.push(Message::user(format_tool_results(&results)));
        }
    }

    /// One completion under the retry policy, streamed when configured.
    async fn complete(&self, conversation: &[Message]) -> Result<String, ApiError> {
        let options = &self.config.chat;
        if self.config.streaming {
            retry_stream(
                &self.config.retry,
                || self.client.complete_stream(conversation, options),
                |delta| self.emit(HarnessEvent::TextDelta(delta)),
            )
            .await
        } else {
            retry(&self.config.retry, || {
                self.client.complete(conversation, options)
            })
            .await
        }
    }

    fn finalize(&self, text: String) -> String {
        if !self.config.extract_answer_only {
            return text;
        }
        let model = self
            .config
            .chat
            .model
            .as_deref()
            .unwrap_or_else(|| self.client.model());
        process_model_response(&text, model, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::FnTool;
    use crate::{ToolDef, json_schema_for};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::{Value, json};

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    fn echo(name: &str) -> FnTool {
        FnTool::new(
            ToolDef::new(name, "Echo text", json_schema_for::<EchoArgs>()),
            |args: EchoArgs| async move { Ok::<Value, crate::error::ToolError>(json!(args.text)) },
        )
    }

    #[test]
    fn transient_guard_restores_shadowed_tool() {
        let registry = ToolRegistry::new().with(echo("echo"));
        let original = registry.get("echo").unwrap();
        {
            let _guard = TransientGuard::register(
                &registry,
                vec![
                    Arc::new(echo("echo")) as Arc<dyn Tool>,
                    Arc::new(echo("extra")) as Arc<dyn Tool>,
                ],
            );
            assert!(registry.contains("extra"));
            assert!(!Arc::ptr_eq(&registry.get("echo").unwrap(), &original));
        }
        assert!(!registry.contains("extra"));
        assert!(Arc::ptr_eq(&registry.get("echo").unwrap(), &original));
    }

    #[test]
    fn into_parts() {
        let outcome = ToolRunOutcome {
            text: "done".into(),
            tool_usage: vec![ToolUsage {
                turn: 1,
                tool: "echo".into(),
                arguments: ToolArgs::new(),
            }],
            turns_used: 2,
            completion_calls: 2,
        };
        let (text, usage) = outcome.into_parts();
        assert_eq!(text, "done");
        assert_eq!(usage.len(), 1);
    }

    #[test]
    fn run_options_builders() {
        let options = RunOptions::new()
            .with_tool_choice(ToolChoice::None)
            .with_transient_tool(echo("scratch"))
            .with_max_turns(5)
            .with_max_tools_to_use(1);
        assert_eq!(options.tool_choice, ToolChoice::None);
        assert_eq!(options.transient_tools[0].name(), "scratch");
        assert!(format!("{options:?}").contains("scratch"));
    }
}
