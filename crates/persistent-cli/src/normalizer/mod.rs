//! Output normalization: raw tool output in, [`UnifiedCliEvent`]s out.
//!
//! The normalizer is a pure transform. It owns no process state and can be
//! driven entirely from canned strings:
//!
//! ```rust
//! use persistent_cli::normalizer::{OutputNormalizer, codex::CodexAdapter};
//!
//! let mut normalizer = OutputNormalizer::jsonl(Box::new(CodexAdapter));
//! let events = normalizer.push_chunk(
//!     br#"{"type":"turn.completed","usage":{"input_tokens":10,"output_tokens":5}}
//! "#,
//! );
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].event_type, "turn.completed");
//! assert_eq!(events[0].usage.unwrap().input_tokens, Some(10));
//! ```
//!
//! Two modes exist, chosen per session:
//!
//! - **JSONL**: every line is one JSON document. A per-tool [`OutputAdapter`]
//!   maps known shapes; well-formed but unrecognized documents become
//!   `is_unknown` events, and lines that are not JSON become `is_error`
//!   events. Nothing is dropped and a bad line never stops the stream.
//! - **Plain**: output is freeform text (usually Markdown). Bytes are decoded
//!   incrementally and emitted as `message.delta` events; [`finish`] emits a
//!   `message.completed` event holding the whole text.
//!
//! [`finish`]: OutputNormalizer::finish

pub mod claude;
pub mod codex;
pub mod plain;

use crate::core::ToolId;
use crate::events::{UnifiedCliEvent, event_types};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, trace, warn};

pub use plain::Utf8ChunkDecoder;

/// Output protocol of a tool session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One JSON document per line.
    Jsonl,
    /// Freeform text.
    #[default]
    Plain,
}

/// Which adapter understands a tool's JSONL schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// `codex exec --json` events.
    Codex,
    /// Claude Code `stream-json` messages.
    Claude,
    /// No schema knowledge; every document is forwarded as unknown.
    Passthrough,
}

impl AdapterKind {
    /// Guess the adapter from a tool id.
    pub fn infer(tool_id: &ToolId) -> Self {
        let id = tool_id.as_str().to_ascii_lowercase();
        if id.contains("codex") {
            Self::Codex
        } else if id.contains("claude") {
            Self::Claude
        } else {
            Self::Passthrough
        }
    }

    /// Instantiate the adapter.
    pub fn build(self) -> Box<dyn OutputAdapter> {
        match self {
            Self::Codex => Box::new(codex::CodexAdapter),
            Self::Claude => Box::new(claude::ClaudeStreamAdapter),
            Self::Passthrough => Box::new(PassthroughAdapter),
        }
    }
}

/// Maps one tool's JSON documents into unified events.
pub trait OutputAdapter: Send + Sync + fmt::Debug {
    /// Adapter name for logs.
    fn name(&self) -> &'static str;

    /// Map one parsed document.
    ///
    /// Returns `None` when the shape is not recognized; the normalizer then
    /// forwards it as an unknown event. A recognized document always maps to
    /// at least one event.
    fn map(&self, value: &Value) -> Option<Vec<UnifiedCliEvent>>;
}

/// Adapter with no schema knowledge.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughAdapter;

impl OutputAdapter for PassthroughAdapter {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn map(&self, _value: &Value) -> Option<Vec<UnifiedCliEvent>> {
        None
    }
}

/// Stateful front end that turns raw output bytes into events.
#[derive(Debug)]
pub struct OutputNormalizer {
    mode: OutputMode,
    adapter: Box<dyn OutputAdapter>,
    line_buffer: Vec<u8>,
    decoder: Utf8ChunkDecoder,
    accumulated: String,
}

impl OutputNormalizer {
    /// JSONL normalizer using `adapter`.
    pub fn jsonl(adapter: Box<dyn OutputAdapter>) -> Self {
        Self::new(OutputMode::Jsonl, adapter)
    }

    /// Plain-text normalizer.
    pub fn plain() -> Self {
        Self::new(OutputMode::Plain, Box::new(PassthroughAdapter))
    }

    /// Normalizer for a tool, with an explicit adapter or one inferred from the id.
    pub fn for_tool(tool_id: &ToolId, mode: OutputMode, adapter: Option<AdapterKind>) -> Self {
        let adapter = adapter.unwrap_or_else(|| AdapterKind::infer(tool_id)).build();
        Self::new(mode, adapter)
    }

    fn new(mode: OutputMode, adapter: Box<dyn OutputAdapter>) -> Self {
        Self {
            mode,
            adapter,
            line_buffer: Vec::with_capacity(4096),
            decoder: Utf8ChunkDecoder::default(),
            accumulated: String::new(),
        }
    }

    /// Active mode.
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Plain-mode text seen so far.
    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    /// Feed raw bytes as they arrive; returns the events they complete, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<UnifiedCliEvent> {
        match self.mode {
            OutputMode::Jsonl => {
                // Bytes before the previous end were already searched for a newline.
                let mut scan_from = self.line_buffer.len();
                self.line_buffer.extend_from_slice(chunk);
                let mut events = Vec::new();
                let mut consumed = 0;
                while let Some(offset) = self.line_buffer[scan_from..].iter().position(|b| *b == b'\n') {
                    let end = scan_from + offset + 1;
                    let line = String::from_utf8_lossy(&self.line_buffer[consumed..end]).into_owned();
                    events.extend(self.normalize_line(&line));
                    consumed = end;
                    scan_from = end;
                }
                self.line_buffer.drain(..consumed);
                events
            }
            OutputMode::Plain => {
                let text = self.decoder.decode(chunk);
                self.plain_delta(text).into_iter().collect()
            }
        }
    }

    /// Normalize one complete line.
    ///
    /// Blank lines produce nothing in JSONL mode. In plain mode the line is
    /// appended with its terminator.
    pub fn normalize_line(&mut self, line: &str) -> Vec<UnifiedCliEvent> {
        match self.mode {
            OutputMode::Jsonl => {
                let line = line.trim_end_matches(['\r', '\n']);
                if line.trim().is_empty() {
                    return Vec::new();
                }
                self.normalize_json_line(line)
            }
            OutputMode::Plain => {
                let mut text = line.to_string();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                self.plain_delta(text).into_iter().collect()
            }
        }
    }

    /// Flush buffered input at end of stream.
    ///
    /// JSONL mode normalizes a trailing line that had no terminator. Plain
    /// mode flushes any incomplete UTF-8 tail and emits `message.completed`
    /// with the full text.
    pub fn finish(&mut self) -> Vec<UnifiedCliEvent> {
        match self.mode {
            OutputMode::Jsonl => {
                if self.line_buffer.is_empty() {
                    return Vec::new();
                }
                let rest = std::mem::take(&mut self.line_buffer);
                self.normalize_line(&String::from_utf8_lossy(&rest))
            }
            OutputMode::Plain => {
                let tail = self.decoder.flush();
                let mut events: Vec<UnifiedCliEvent> = self.plain_delta(tail).into_iter().collect();
                events.push(
                    UnifiedCliEvent::new(event_types::MESSAGE_COMPLETED)
                        .with_item_type(crate::events::item_types::AGENT_MESSAGE)
                        .with_content(self.accumulated.clone()),
                );
                events
            }
        }
    }

    fn plain_delta(&mut self, text: String) -> Option<UnifiedCliEvent> {
        if text.is_empty() {
            return None;
        }
        self.accumulated.push_str(&text);
        Some(
            UnifiedCliEvent::new(event_types::MESSAGE_DELTA)
                .with_item_type(crate::events::item_types::AGENT_MESSAGE)
                .with_content(text),
        )
    }

    fn normalize_json_line(&self, line: &str) -> Vec<UnifiedCliEvent> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(adapter = self.adapter.name(), "Malformed output line: {}", e);
                return vec![UnifiedCliEvent::protocol_error(line, format!("Invalid JSON: {}", e))];
            }
        };

        let mut events = match self.adapter.map(&value) {
            Some(events) if !events.is_empty() => events,
            _ => {
                let event_type = discriminator(&value).unwrap_or(event_types::UNKNOWN);
                debug!(adapter = self.adapter.name(), event_type, "Unrecognized event shape");
                vec![UnifiedCliEvent::unknown(event_type, best_effort_text(&value))]
            }
        };

        for event in &mut events {
            if event.raw_json.is_none() {
                event.raw_json = Some(line.to_string());
            }
        }
        trace!(count = events.len(), "Normalized line");
        events
    }
}

/// The document's `type` field, when it is a string.
pub fn discriminator(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Readable text for a document nobody understood. Never empty.
pub fn best_effort_text(value: &Value) -> String {
    for field in ["content", "text", "message", "result"] {
        if let Some(text) = value.get(field).and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return text.to_string();
            }
        }
    }
    match value {
        Value::String(s) if !s.is_empty() => s.clone(),
        other => other.to_string(),
    }
}

/// String field helper shared by adapters.
pub(crate) fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}
