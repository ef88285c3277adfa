//! Unified output event model.
//!
//! Every tool adapter normalizes its native output into [`UnifiedCliEvent`].
//! The primary meaning of an event lives in [`EventPayload`], a tagged union:
//! an event carries text content, *or* a command execution, *or* a todo list,
//! *or* a user question, never several at once. The error and unknown flags
//! and token usage are orthogonal and may accompany any payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known event types.
pub mod event_types {
    /// Tool reported its own session/thread id.
    pub const THREAD_STARTED: &str = "thread.started";
    /// A turn began.
    pub const TURN_STARTED: &str = "turn.started";
    /// A turn finished (usually carries usage).
    pub const TURN_COMPLETED: &str = "turn.completed";
    /// A turn failed.
    pub const TURN_FAILED: &str = "turn.failed";
    /// An item began.
    pub const ITEM_STARTED: &str = "item.started";
    /// An item changed.
    pub const ITEM_UPDATED: &str = "item.updated";
    /// An item finished.
    pub const ITEM_COMPLETED: &str = "item.completed";
    /// Tool-level error.
    pub const ERROR: &str = "error";
    /// A raw output line could not be parsed.
    pub const PROTOCOL_ERROR: &str = "protocol.error";
    /// Plain-mode incremental output.
    pub const MESSAGE_DELTA: &str = "message.delta";
    /// Plain-mode final output.
    pub const MESSAGE_COMPLETED: &str = "message.completed";
    /// Fallback type for JSON documents without a discriminator.
    pub const UNKNOWN: &str = "unknown";
}

/// Well-known item types for `item.*` events.
pub mod item_types {
    /// Model reasoning summary.
    pub const REASONING: &str = "reasoning";
    /// Assistant reply text.
    pub const AGENT_MESSAGE: &str = "agent_message";
    /// Shell command run by the tool.
    pub const COMMAND_EXECUTION: &str = "command_execution";
    /// File edits.
    pub const FILE_CHANGE: &str = "file_change";
    /// MCP tool call.
    pub const MCP_TOOL_CALL: &str = "mcp_tool_call";
    /// Web search.
    pub const WEB_SEARCH: &str = "web_search";
    /// Task list.
    pub const TODO_LIST: &str = "todo_list";
    /// Generic tool invocation.
    pub const TOOL_CALL: &str = "tool_call";
    /// Result of a tool invocation.
    pub const TOOL_RESULT: &str = "tool_result";
    /// The tool is asking the user something.
    pub const USER_QUESTION: &str = "user_question";
    /// Item-level error.
    pub const ERROR: &str = "error";
}

/// One normalized output event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedCliEvent {
    /// Discriminator, e.g. `turn.completed`.
    pub event_type: String,

    /// The tool's own session/thread id, used to resume a conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_thread_id: Option<String>,

    /// Sub-kind for generic item events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,

    /// Short UI label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Primary meaning of the event.
    #[serde(default)]
    pub payload: EventPayload,

    /// Error flag.
    #[serde(default)]
    pub is_error: bool,

    /// Error message, when `is_error` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// The adapter did not recognize this shape.
    #[serde(default)]
    pub is_unknown: bool,

    /// Token accounting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    /// Anything not otherwise modeled.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Original source line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_json: Option<String>,
}

/// Primary payload of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Lifecycle-only event (e.g. `turn.started`).
    #[default]
    None,
    /// Textual content.
    Content(String),
    /// A shell command run by the tool.
    CommandExecution(CommandExecution),
    /// A task list reported by the tool.
    TodoList(Vec<TodoItem>),
    /// The tool paused to ask the user something.
    UserQuestion(UserQuestion),
}

/// Token accounting. Absent source fields stay `None`, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Prompt tokens served from cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
    /// Completion tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

impl TokenUsage {
    /// Parse from a JSON object, accepting both codex and Anthropic field names.
    ///
    /// Returns `None` when the object carries none of the known counters.
    pub fn from_json(value: &Value) -> Option<Self> {
        let field = |names: &[&str]| names.iter().find_map(|name| value.get(*name)?.as_u64());
        let usage = Self {
            input_tokens: field(&["input_tokens"]),
            cached_input_tokens: field(&["cached_input_tokens", "cache_read_input_tokens"]),
            output_tokens: field(&["output_tokens"]),
        };
        if usage.is_empty() { None } else { Some(usage) }
    }

    /// True when no counter is set.
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.cached_input_tokens.is_none() && self.output_tokens.is_none()
    }

    /// Sum of input and output tokens, when both are known and the sum fits.
    pub fn total_tokens(&self) -> Option<u64> {
        self.input_tokens?.checked_add(self.output_tokens?)
    }
}

/// A shell command run by the tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecution {
    /// Command line.
    pub command: Option<String>,
    /// Captured output so far.
    pub output: Option<String>,
    /// Exit code, once finished.
    pub exit_code: Option<i32>,
    /// `in_progress`, `completed`, `failed`, ...
    pub status: Option<String>,
}

/// One entry of a tool-reported task list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    /// Stable id, when the tool provides one.
    pub id: Option<String>,
    /// Task text.
    pub title: Option<String>,
    /// `pending`, `in_progress`, `completed`, ...
    pub status: Option<String>,
}

/// A prompt-for-input raised by the tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuestion {
    /// Tool-use id to answer against.
    pub tool_use_id: Option<String>,
    /// Questions, in display order.
    pub questions: Vec<QuestionItem>,
}

/// A single question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionItem {
    /// Short header.
    pub header: Option<String>,
    /// Question text.
    pub question: Option<String>,
    /// Whether several options may be chosen, when the tool says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_select: Option<bool>,
    /// Offered answers.
    pub options: Vec<QuestionOption>,
}

/// One offered answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    /// Label shown to the user.
    pub label: Option<String>,
    /// Longer explanation.
    pub description: Option<String>,
}

impl UnifiedCliEvent {
    /// Create an event with the given type and no payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            cli_thread_id: None,
            item_type: None,
            title: None,
            payload: EventPayload::None,
            is_error: false,
            error_message: None,
            is_unknown: false,
            usage: None,
            metadata: Map::new(),
            raw_json: None,
        }
    }

    /// Event for a JSON document the adapter could not map.
    pub fn unknown(event_type: impl Into<String>, content: impl Into<String>) -> Self {
        let mut event = Self::new(event_type).with_content(content);
        event.is_unknown = true;
        event
    }

    /// Event for an output line that is not valid JSON.
    pub fn protocol_error(line: &str, reason: impl Into<String>) -> Self {
        Self::new(event_types::PROTOCOL_ERROR)
            .with_content(line)
            .with_error(reason)
            .with_raw(line)
    }

    /// Set the text payload.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.payload = EventPayload::Content(content.into());
        self
    }

    /// Set the text payload if there is one; otherwise leave the payload unset.
    pub fn with_optional_content(self, content: Option<String>) -> Self {
        match content {
            Some(content) => self.with_content(content),
            None => self,
        }
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Set the item type.
    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = Some(item_type.into());
        self
    }

    /// Set the UI title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the tool thread id.
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.cli_thread_id = Some(thread_id.into());
        self
    }

    /// Mark as error.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.is_error = true;
        self.error_message = Some(message.into());
        self
    }

    /// Attach usage.
    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }

    /// Keep the original line.
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_json = Some(raw.into());
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Text content, if that is the payload.
    pub fn content(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Content(text) => Some(text),
            _ => None,
        }
    }

    /// Command execution, if that is the payload.
    pub fn command_execution(&self) -> Option<&CommandExecution> {
        match &self.payload {
            EventPayload::CommandExecution(exec) => Some(exec),
            _ => None,
        }
    }

    /// Todo items, if that is the payload.
    pub fn todo_items(&self) -> Option<&[TodoItem]> {
        match &self.payload {
            EventPayload::TodoList(items) => Some(items),
            _ => None,
        }
    }

    /// User question, if that is the payload.
    pub fn user_question(&self) -> Option<&UserQuestion> {
        match &self.payload {
            EventPayload::UserQuestion(question) => Some(question),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_absent_fields_stay_unset() {
        let usage = TokenUsage::from_json(&json!({"input_tokens": 0, "output_tokens": 5})).unwrap();
        assert_eq!(usage.input_tokens, Some(0));
        assert_eq!(usage.cached_input_tokens, None);
        assert_eq!(usage.output_tokens, Some(5));
        assert_eq!(usage.total_tokens(), Some(5));
    }

    #[test]
    fn test_total_tokens_does_not_overflow() {
        let usage = TokenUsage {
            input_tokens: Some(40),
            output_tokens: Some(2),
            ..TokenUsage::default()
        };
        assert_eq!(usage.total_tokens(), Some(42));

        let usage = TokenUsage {
            input_tokens: Some(u64::MAX),
            output_tokens: Some(1),
            ..TokenUsage::default()
        };
        assert_eq!(usage.total_tokens(), None);
    }

    #[test]
    fn test_usage_without_counters_is_none() {
        assert!(TokenUsage::from_json(&json!({"service_tier": "standard"})).is_none());
    }

    #[test]
    fn test_usage_accepts_anthropic_cache_field() {
        let usage = TokenUsage::from_json(&json!({"cache_read_input_tokens": 12})).unwrap();
        assert_eq!(usage.cached_input_tokens, Some(12));
        assert_eq!(usage.total_tokens(), None);
    }

    #[test]
    fn test_payload_accessors_are_exclusive() {
        let event = UnifiedCliEvent::new(event_types::ITEM_COMPLETED).with_payload(
            EventPayload::TodoList(vec![TodoItem {
                id: Some("1".into()),
                title: Some("write tests".into()),
                status: Some("pending".into()),
            }]),
        );
        assert_eq!(event.todo_items().map(<[TodoItem]>::len), Some(1));
        assert!(event.content().is_none());
        assert!(event.command_execution().is_none());
        assert!(event.user_question().is_none());
    }

    #[test]
    fn test_protocol_error_event() {
        let event = UnifiedCliEvent::protocol_error("not json", "expected value");
        assert!(event.is_error);
        assert!(!event.is_unknown);
        assert_eq!(event.content(), Some("not json"));
        assert_eq!(event.raw_json.as_deref(), Some("not json"));
    }

    #[test]
    fn test_serialized_shape() {
        let event = UnifiedCliEvent::new(event_types::TURN_COMPLETED).with_usage(Some(TokenUsage {
            input_tokens: Some(10),
            cached_input_tokens: None,
            output_tokens: Some(5),
        }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "turn.completed");
        assert_eq!(value["usage"]["inputTokens"], 10);
        assert!(value["usage"].get("cachedInputTokens").is_none());
        assert_eq!(value["payload"]["kind"], "none");
    }
}
