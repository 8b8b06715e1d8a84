//! Prompt text the harness adds to a conversation: tool instructions, the
//! tool results message, and the optional real-time context block.

use crate::tools::ToolResult;
use crate::tools::datetime::{DateFormat, describe};
use crate::{Message, MessageRole, ToolDef};
use chrono::{DateTime, Local, Utc};

/// Phrase that marks a system message as already carrying tool instructions.
pub const TOOLS_MARKER: &str = "You have access to the following tools";

/// Instructions describing every tool and both calling conventions.
pub fn tool_instructions(schemas: &[ToolDef]) -> String {
    let schemas_json =
        serde_json::to_string_pretty(schemas).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{TOOLS_MARKER}:\n\n\
         {schemas_json}\n\n\
         To use a tool, write a JSON code block with exactly the keys \"name\" and \"arguments\":\n\n\
         ```json\n\
         {{\"name\": \"tool_name\", \"arguments\": {{\"param\": \"value\"}}}}\n\
         ```\n\n\
         Or write the call inline as tool_name(param=\"value\", other=\"value\"), \
         or tool_name() for a tool that needs no arguments.\n\n\
         You may request several tools at once. Their results will be sent back to you \
         before you give your final answer. Only call a tool when you need information \
         you do not already have."
    )
}

/// Add tool instructions to `messages` unless a system message already has
/// them. Returns whether anything changed.
///
/// The instructions are appended to the first system message, or become a
/// new system message at the front of the conversation.
pub fn inject_tool_instructions(messages: &mut Vec<Message>, schemas: &[ToolDef]) -> bool {
    let already = messages
        .iter()
        .any(|m| m.role == MessageRole::System && m.content.contains(TOOLS_MARKER));
    if already {
        return false;
    }
    let instructions = tool_instructions(schemas);
    match messages.iter_mut().find(|m| m.role == MessageRole::System) {
        Some(system) => {
            system.content.push_str("\n\n");
            system.content.push_str(&instructions);
        }
        None => messages.insert(0, Message::system(instructions)),
    }
    true
}

/// Body of the user message that reports one turn's tool outcomes.
pub fn format_tool_results(results: &[(String, ToolResult)]) -> String {
    let blocks: Vec<String> = results
        .iter()
        .map(|(name, result)| match result.error() {
            None => format!(
                "Tool: {name}\nStatus: success\nResult:\n{}",
                result.display_content()
            ),
            Some(error) => format!("Tool: {name}\nStatus: error\nError: {error}"),
        })
        .collect();
    format!(
        "Tool results:\n\n{}\n\nUse these results to answer the original question. \
         If a tool failed, say so rather than guessing.",
        blocks.join("\n\n")
    )
}

/// Current date and time as a JSON block, for the system prompt.
pub fn realtime_context(now: DateTime<Utc>) -> String {
    let local = now.with_timezone(&Local).fixed_offset();
    let label = local.format("%:z").to_string();
    let info = describe(local, now, &label, DateFormat::Full);
    format!(
        "Current date and time information (use it for anything time-sensitive):\n{}",
        serde_json::to_string_pretty(&info).unwrap_or_else(|_| info.to_string())
    )
}

/// Put the real-time block at the top of the first system message, or in
/// a new system message at the front.
pub fn prepend_realtime_context(messages: &mut Vec<Message>, now: DateTime<Utc>) {
    let context = realtime_context(now);
    match messages.iter_mut().find(|m| m.role == MessageRole::System) {
        Some(system) => system.content = format!("{context}\n\n{}", system.content),
        None => messages.insert(0, Message::system(context)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn calculator_def() -> ToolDef {
        ToolDef::new(
            "calculator",
            "Evaluate arithmetic",
            json!({"type": "object", "properties": {"expression": {"type": "string"}}, "required": ["expression"]}),
        )
    }

    #[test]
    fn appends_to_existing_system_message() {
        let mut messages = vec![Message::system("Be brief."), Message::user("2+2?")];
        assert!(inject_tool_instructions(&mut messages, &[calculator_def()]));
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.starts_with("Be brief.\n\n"));
        assert!(messages[0].content.contains(TOOLS_MARKER));
        assert!(messages[0].content.contains("\"calculator\""));
        assert!(messages[0].content.contains("tool_name() for a tool that needs no arguments"));
    }

    #[test]
    fn inserts_system_message_when_missing() {
        let mut messages = vec![Message::user("hi")];
        inject_tool_instructions(&mut messages, &[calculator_def()]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[1].content, "hi");
    }

    #[test]
    fn injection_happens_once() {
        let mut messages = vec![Message::user("hi")];
        inject_tool_instructions(&mut messages, &[calculator_def()]);
        let snapshot = messages.clone();
        assert!(!inject_tool_instructions(&mut messages, &[calculator_def()]));
        assert_eq!(messages, snapshot);
    }

    #[test]
    fn results_message_shape() {
        let body = format_tool_results(&[
            (
                "calculator".into(),
                ToolResult::success_result(json!({"result": 4})),
            ),
            ("date_time".into(), ToolResult::success_result("Friday")),
            ("weather".into(), ToolResult::error_result("Location 'X' not found")),
        ]);
        assert!(body.starts_with("Tool results:\n\nTool: calculator\nStatus: success\nResult:\n{\n  \"result\": 4\n}"));
        assert!(body.contains("\n\nTool: date_time\nStatus: success\nResult:\nFriday\n\n"));
        assert!(body.contains("Tool: weather\nStatus: error\nError: Location 'X' not found"));
    }

    #[test]
    fn realtime_block_is_prepended() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let mut messages = vec![Message::system("Be brief.")];
        prepend_realtime_context(&mut messages, now);
        assert!(messages[0].content.starts_with("Current date and time information"));
        assert!(messages[0].content.contains("\"unix_timestamp\": 1710504000"));
        assert!(messages[0].content.ends_with("Be brief."));
    }
}
