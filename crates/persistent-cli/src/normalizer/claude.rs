//! Adapter for Claude Code `--output-format stream-json` output.
//!
//! Messages come in four top-level kinds: `system`, `assistant`, `user` and
//! `result`. An assistant or user message carries an array of content blocks;
//! each block becomes its own event, in order.

use super::{OutputAdapter, str_field};
use crate::events::{
    CommandExecution, EventPayload, QuestionItem, QuestionOption, TodoItem, TokenUsage,
    UnifiedCliEvent, UserQuestion, event_types, item_types,
};
use serde_json::Value;
use tracing::debug;

/// Tool name Claude uses to ask the user multiple-choice questions.
pub const ASK_USER_QUESTION_TOOL: &str = "AskUserQuestion";
/// Tool name Claude uses to publish its task list.
pub const TODO_WRITE_TOOL: &str = "TodoWrite";
/// Tool name for shell commands.
pub const BASH_TOOL: &str = "Bash";

/// Maps Claude stream-json messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeStreamAdapter;

impl OutputAdapter for ClaudeStreamAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn map(&self, value: &Value) -> Option<Vec<UnifiedCliEvent>> {
        let msg_type = value.get("type")?.as_str()?;
        let session_id = str_field(value, "session_id");

        let mut events = match msg_type {
            "system" => vec![map_system(value)],
            "assistant" => map_blocks(value, event_types::ITEM_COMPLETED)?,
            "user" => map_user(value)?,
            "result" => vec![map_result(value)],
            _ => {
                debug!("Ignoring message type: {}", msg_type);
                return None;
            }
        };

        if let Some(session_id) = session_id {
            for event in &mut events {
                if event.cli_thread_id.is_none() {
                    event.cli_thread_id = Some(session_id.clone());
                }
            }
        }
        Some(events)
    }
}

fn map_system(value: &Value) -> UnifiedCliEvent {
    let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("unknown");
    let mut event = if subtype == "init" {
        UnifiedCliEvent::new(event_types::THREAD_STARTED)
    } else {
        UnifiedCliEvent::new(format!("system.{}", subtype))
    };
    event = event.with_metadata("subtype", Value::String(subtype.to_string()));
    for field in ["model", "cwd", "permissionMode"] {
        if let Some(v) = value.get(field) {
            event = event.with_metadata(field, v.clone());
        }
    }
    event
}

fn map_blocks(value: &Value, event_type: &str) -> Option<Vec<UnifiedCliEvent>> {
    let content = value.pointer("/message/content")?;
    let blocks = content.as_array()?;
    if blocks.is_empty() {
        return Some(vec![
            UnifiedCliEvent::new(event_type).with_item_type(item_types::AGENT_MESSAGE),
        ]);
    }
    Some(blocks.iter().map(|block| map_block(block, event_type)).collect())
}

fn map_block(block: &Value, event_type: &str) -> UnifiedCliEvent {
    let event = UnifiedCliEvent::new(event_type);
    match block.get("type").and_then(Value::as_str) {
        Some("text") => event
            .with_item_type(item_types::AGENT_MESSAGE)
            .with_title("Assistant")
            .with_optional_content(str_field(block, "text")),
        Some("thinking") => event
            .with_item_type(item_types::REASONING)
            .with_title("Thinking")
            .with_optional_content(str_field(block, "thinking")),
        Some("tool_use") => map_tool_use(block, event),
        Some("tool_result") => map_tool_result(block, event),
        other => {
            debug!("Unknown content block type: {:?}", other);
            let mut event = event.with_content(block.to_string());
            if let Some(kind) = other {
                event = event.with_item_type(kind);
            }
            event.is_unknown = true;
            event
        }
    }
}

fn map_tool_use(block: &Value, event: UnifiedCliEvent) -> UnifiedCliEvent {
    let name = str_field(block, "name").unwrap_or_default();
    let tool_use_id = str_field(block, "id");
    let empty = Value::Object(serde_json::Map::new());
    let input = block.get("input").unwrap_or(&empty);

    let mut event = match name.as_str() {
        ASK_USER_QUESTION_TOOL => event
            .with_item_type(item_types::USER_QUESTION)
            .with_title("Question")
            .with_payload(EventPayload::UserQuestion(UserQuestion {
                tool_use_id: tool_use_id.clone(),
                questions: parse_questions(input),
            })),
        TODO_WRITE_TOOL => event
            .with_item_type(item_types::TODO_LIST)
            .with_title("Plan")
            .with_payload(EventPayload::TodoList(parse_todos(input))),
        BASH_TOOL => event
            .with_item_type(item_types::COMMAND_EXECUTION)
            .with_title("Command")
            .with_payload(EventPayload::CommandExecution(CommandExecution {
                command: str_field(input, "command"),
                output: None,
                exit_code: None,
                status: None,
            })),
        _ => event
            .with_item_type(item_types::TOOL_CALL)
            .with_title(name.clone())
            .with_content(input.to_string()),
    };

    event = event.with_metadata("toolName", Value::String(name));
    if let Some(id) = tool_use_id {
        event = event.with_metadata("toolUseId", Value::String(id));
    }
    event
}

fn map_tool_result(block: &Value, event: UnifiedCliEvent) -> UnifiedCliEvent {
    let text = match block.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    let mut event = event
        .with_item_type(item_types::TOOL_RESULT)
        .with_title("Tool result")
        .with_content(text.clone());
    if let Some(id) = block.get("tool_use_id") {
        event = event.with_metadata("toolUseId", id.clone());
    }
    if block.get("is_error").and_then(Value::as_bool).unwrap_or(false) {
        event = event.with_error(text);
    }
    event
}

fn map_user(value: &Value) -> Option<Vec<UnifiedCliEvent>> {
    match value.pointer("/message/content")? {
        Value::String(text) => Some(vec![
            UnifiedCliEvent::new(event_types::ITEM_COMPLETED)
                .with_item_type("user_message")
                .with_content(text.clone()),
        ]),
        Value::Array(_) => map_blocks(value, event_types::ITEM_COMPLETED),
        _ => None,
    }
}

fn map_result(value: &Value) -> UnifiedCliEvent {
    let is_error = value.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("unknown");
    let (event_type, title) = if is_error {
        (event_types::TURN_FAILED, "Failed")
    } else {
        (event_types::TURN_COMPLETED, "Completed")
    };

    let mut event = UnifiedCliEvent::new(event_type)
        .with_title(title)
        .with_usage(value.get("usage").and_then(TokenUsage::from_json))
        .with_metadata("subtype", Value::String(subtype.to_string()));
    if let Some(result) = str_field(value, "result") {
        event = event.with_content(result);
    }
    for field in ["duration_ms", "num_turns", "total_cost_usd"] {
        if let Some(v) = value.get(field) {
            event = event.with_metadata(field, v.clone());
        }
    }
    if is_error {
        let message = str_field(value, "result").unwrap_or_else(|| subtype.to_string());
        event = event.with_error(message);
    }
    event
}

fn parse_questions(input: &Value) -> Vec<QuestionItem> {
    let Some(questions) = input.get("questions").and_then(Value::as_array) else {
        return Vec::new();
    };
    questions
        .iter()
        .map(|q| QuestionItem {
            header: str_field(q, "header"),
            question: str_field(q, "question"),
            multi_select: q.get("multiSelect").and_then(Value::as_bool),
            options: q
                .get("options")
                .and_then(Value::as_array)
                .map(|options| {
                    options
                        .iter()
                        .map(|o| QuestionOption {
                            label: str_field(o, "label"),
                            description: str_field(o, "description"),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect()
}

fn parse_todos(input: &Value) -> Vec<TodoItem> {
    let Some(todos) = input.get("todos").and_then(Value::as_array) else {
        return Vec::new();
    };
    todos
        .iter()
        .map(|todo| TodoItem {
            id: str_field(todo, "id"),
            title: str_field(todo, "content").or_else(|| str_field(todo, "activeForm")),
            status: str_field(todo, "status"),
        })
        .collect()
}
