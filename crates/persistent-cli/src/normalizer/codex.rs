//! Adapter for `codex exec --json` output.
//!
//! Codex emits thread/turn lifecycle events plus `item.*` events wrapping a
//! typed item (`agent_message`, `command_execution`, `todo_list`, ...).

use super::{OutputAdapter, str_field};
use crate::events::{
    CommandExecution, EventPayload, TodoItem, TokenUsage, UnifiedCliEvent, event_types, item_types,
};
use serde_json::Value;

/// Maps codex JSONL events.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexAdapter;

impl OutputAdapter for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn map(&self, value: &Value) -> Option<Vec<UnifiedCliEvent>> {
        let event_type = value.get("type")?.as_str()?;
        let event = match event_type {
            event_types::THREAD_STARTED => {
                let mut event = UnifiedCliEvent::new(event_type);
                if let Some(thread_id) = str_field(value, "thread_id") {
                    event = event.with_thread_id(thread_id);
                }
                event
            }
            event_types::TURN_STARTED => UnifiedCliEvent::new(event_type),
            event_types::TURN_COMPLETED => UnifiedCliEvent::new(event_type)
                .with_usage(value.get("usage").and_then(TokenUsage::from_json)),
            event_types::TURN_FAILED => {
                let message = value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("Turn failed");
                UnifiedCliEvent::new(event_type)
                    .with_content(message)
                    .with_error(message)
            }
            event_types::ERROR => {
                let message = str_field(value, "message").unwrap_or_else(|| "Unknown error".to_string());
                UnifiedCliEvent::new(event_type)
                    .with_content(message.clone())
                    .with_error(message)
            }
            event_types::ITEM_STARTED | event_types::ITEM_UPDATED | event_types::ITEM_COMPLETED => {
                map_item(event_type, value.get("item")?)?
            }
            _ => return None,
        };
        Some(vec![event])
    }
}

fn map_item(event_type: &str, item: &Value) -> Option<UnifiedCliEvent> {
    // Older codex builds used `item_type` instead of `type`.
    let item_type = str_field(item, "type").or_else(|| str_field(item, "item_type"))?;
    let mut event = UnifiedCliEvent::new(event_type).with_item_type(item_type.clone());
    if let Some(id) = item.get("id") {
        event = event.with_metadata("itemId", id.clone());
    }
    if let Some(status) = item.get("status") {
        event = event.with_metadata("status", status.clone());
    }

    let event = match item_type.as_str() {
        item_types::AGENT_MESSAGE => event
            .with_title("Assistant")
            .with_optional_content(str_field(item, "text")),
        item_types::REASONING => event
            .with_title("Reasoning")
            .with_optional_content(str_field(item, "text")),
        item_types::COMMAND_EXECUTION => {
            let exec = CommandExecution {
                command: str_field(item, "command"),
                output: str_field(item, "aggregated_output"),
                exit_code: item
                    .get("exit_code")
                    .and_then(Value::as_i64)
                    .and_then(|code| i32::try_from(code).ok()),
                status: str_field(item, "status"),
            };
            let failed = exec.exit_code.is_some_and(|code| code != 0);
            let mut event = event
                .with_title("Command")
                .with_payload(EventPayload::CommandExecution(exec));
            if failed {
                event.is_error = true;
            }
            event
        }
        item_types::FILE_CHANGE => {
            let changes = item.get("changes").and_then(Value::as_array);
            let summary = changes
                .map(|changes| {
                    changes
                        .iter()
                        .map(|change| {
                            format!(
                                "{} {}",
                                change.get("kind").and_then(Value::as_str).unwrap_or("update"),
                                change.get("path").and_then(Value::as_str).unwrap_or("?"),
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            let event = event.with_title("File changes").with_content(summary);
            match item.get("changes") {
                Some(changes) => event.with_metadata("changes", changes.clone()),
                None => event,
            }
        }
        item_types::MCP_TOOL_CALL => {
            let server = str_field(item, "server").unwrap_or_default();
            let tool = str_field(item, "tool").unwrap_or_default();
            event
                .with_title(format!("Tool: {}", tool))
                .with_content(format!("{}.{}", server, tool))
        }
        item_types::WEB_SEARCH => event
            .with_title("Web search")
            .with_optional_content(str_field(item, "query")),
        item_types::TODO_LIST => {
            let items = item
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|todo| TodoItem {
                            id: str_field(todo, "id"),
                            title: str_field(todo, "text"),
                            status: todo.get("completed").and_then(Value::as_bool).map(|done| {
                                if done { "completed" } else { "pending" }.to_string()
                            }),
                        })
                        .collect()
                })
                .unwrap_or_default();
            event.with_title("Plan").with_payload(EventPayload::TodoList(items))
        }
        item_types::ERROR => {
            let message = str_field(item, "message").unwrap_or_else(|| "Unknown error".to_string());
            event.with_content(message.clone()).with_error(message)
        }
        _ => {
            let mut event = event.with_content(item.to_string());
            event.is_unknown = true;
            event
        }
    };
    Some(event)
}
