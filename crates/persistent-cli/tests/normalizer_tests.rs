//! Integration tests for output normalization over realistic transcripts.

use persistent_cli::events::{event_types, item_types};
use persistent_cli::normalizer::claude::ClaudeStreamAdapter;
use persistent_cli::normalizer::codex::CodexAdapter;
use persistent_cli::{AdapterKind, OutputMode, OutputNormalizer, ToolId, UnifiedCliEvent};
use proptest::prelude::*;

const CODEX_TRANSCRIPT: &str = concat!(
    r#"{"type":"thread.started","thread_id":"0199a213-81c0-7800-8aa1-bbab2a035a53"}"#,
    "\n",
    r#"{"type":"turn.started"}"#,
    "\n",
    r#"{"type":"item.completed","item":{"id":"item_0","type":"reasoning","text":"**Scanning the repo**"}}"#,
    "\n",
    r#"{"type":"item.started","item":{"id":"item_1","type":"command_execution","command":"bash -lc ls","aggregated_output":"","status":"in_progress"}}"#,
    "\n",
    r#"{"type":"item.completed","item":{"id":"item_1","type":"command_execution","command":"bash -lc ls","aggregated_output":"Cargo.toml\nsrc\n","exit_code":0,"status":"completed"}}"#,
    "\n",
    r#"{"type":"item.completed","item":{"id":"item_2","type":"agent_message","text":"The repo is a Rust crate."}}"#,
    "\n",
    r#"{"type":"turn.completed","usage":{"input_tokens":24763,"cached_input_tokens":24448,"output_tokens":122}}"#,
    "\n",
);

const CLAUDE_TRANSCRIPT: &str = concat!(
    r#"{"type":"system","subtype":"init","session_id":"a1b2","model":"claude-sonnet"}"#,
    "\n",
    r#"{"type":"assistant","session_id":"a1b2","message":{"content":[{"type":"text","text":"Let me check."},{"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"ls"}}]}}"#,
    "\n",
    r#"{"type":"result","subtype":"success","session_id":"a1b2","is_error":false,"result":"Done","usage":{"input_tokens":10,"output_tokens":4}}"#,
    "\n",
);

fn types(events: &[UnifiedCliEvent]) -> Vec<&str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}

fn run_chunks(mut normalizer: OutputNormalizer, input: &[u8], sizes: &[usize]) -> Vec<UnifiedCliEvent> {
    let mut events = Vec::new();
    let mut rest = input;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() {
        let size = (*sizes.next().unwrap_or(&1)).clamp(1, rest.len());
        let (chunk, tail) = rest.split_at(size);
        events.extend(normalizer.push_chunk(chunk));
        rest = tail;
    }
    events.extend(normalizer.finish());
    events
}

#[test]
fn test_codex_transcript() {
    let mut normalizer = OutputNormalizer::jsonl(Box::new(CodexAdapter));
    let events = normalizer.push_chunk(CODEX_TRANSCRIPT.as_bytes());
    assert!(normalizer.finish().is_empty());

    assert_eq!(
        types(&events),
        vec![
            "thread.started",
            "turn.started",
            "item.completed",
            "item.started",
            "item.completed",
            "item.completed",
            "turn.completed",
        ]
    );
    assert_eq!(
        events[0].cli_thread_id.as_deref(),
        Some("0199a213-81c0-7800-8aa1-bbab2a035a53")
    );
    assert_eq!(events[2].item_type.as_deref(), Some(item_types::REASONING));

    let exec = events[4].command_execution().unwrap();
    assert_eq!(exec.command.as_deref(), Some("bash -lc ls"));
    assert_eq!(exec.output.as_deref(), Some("Cargo.toml\nsrc\n"));
    assert_eq!(exec.exit_code, Some(0));
    assert!(!events[4].is_error);

    assert_eq!(events[5].content(), Some("The repo is a Rust crate."));
    let usage = events[6].usage.unwrap();
    assert_eq!(usage.input_tokens, Some(24763));
    assert_eq!(usage.output_tokens, Some(122));

    assert!(events.iter().all(|e| !e.is_unknown && e.raw_json.is_some()));
}

#[test]
fn test_claude_transcript() {
    let mut normalizer = OutputNormalizer::jsonl(Box::new(ClaudeStreamAdapter));
    let events = normalizer.push_chunk(CLAUDE_TRANSCRIPT.as_bytes());

    assert_eq!(events[0].event_type, event_types::THREAD_STARTED);
    assert_eq!(events[0].cli_thread_id.as_deref(), Some("a1b2"));

    assert_eq!(events[1].item_type.as_deref(), Some(item_types::AGENT_MESSAGE));
    assert_eq!(events[1].content(), Some("Let me check."));
    assert_eq!(events[2].item_type.as_deref(), Some(item_types::COMMAND_EXECUTION));
    assert_eq!(
        events[2].command_execution().and_then(|c| c.command.as_deref()),
        Some("ls")
    );

    let last = events.last().unwrap();
    assert_eq!(last.event_type, event_types::TURN_COMPLETED);
    assert_eq!(last.usage.unwrap().output_tokens, Some(4));
}

#[test]
fn test_malformed_line_does_not_stop_the_stream() {
    let mut normalizer = OutputNormalizer::jsonl(Box::new(CodexAdapter));
    let input = "{\"type\":\"turn.started\"}\n{\"type\":\"turn.comp\n{\"type\":\"turn.completed\"}\n";
    let events = normalizer.push_chunk(input.as_bytes());

    assert_eq!(types(&events), vec!["turn.started", "protocol.error", "turn.completed"]);
    assert!(events[1].is_error);
    assert_eq!(events[1].raw_json.as_deref(), Some("{\"type\":\"turn.comp"));
}

#[test]
fn test_unknown_shapes_are_flagged_not_dropped() {
    let mut normalizer = OutputNormalizer::jsonl(Box::new(CodexAdapter));
    let events = normalizer.push_chunk(b"{\"type\":\"session.configured\",\"message\":\"ready\"}\n[1,2,3]\n");

    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.is_unknown));
    assert_eq!(events[0].event_type, "session.configured");
    assert_eq!(events[0].content(), Some("ready"));
    assert!(!events[1].content().unwrap_or_default().is_empty());
}

#[test]
fn test_trailing_line_without_newline_is_flushed() {
    let mut normalizer = OutputNormalizer::jsonl(Box::new(CodexAdapter));
    assert!(normalizer.push_chunk(b"{\"type\":\"turn.started\"}").is_empty());
    let events = normalizer.finish();
    assert_eq!(types(&events), vec!["turn.started"]);
}

#[test]
fn test_for_tool_picks_adapter_from_id() {
    let mut claude = OutputNormalizer::for_tool(&ToolId::new("claude"), OutputMode::Jsonl, None);
    let events = claude.normalize_line(r#"{"type":"system","subtype":"init","session_id":"x"}"#);
    assert_eq!(events[0].event_type, event_types::THREAD_STARTED);

    let mut passthrough = OutputNormalizer::for_tool(
        &ToolId::new("claude"),
        OutputMode::Jsonl,
        Some(AdapterKind::Passthrough),
    );
    let events = passthrough.normalize_line(r#"{"type":"system","subtype":"init","session_id":"x"}"#);
    assert!(events[0].is_unknown);
}

#[test]
fn test_plain_mode_accumulates_markdown() {
    let mut normalizer = OutputNormalizer::plain();
    let mut events = normalizer.push_chunk(b"# Plan\n\n- step ");
    events.extend(normalizer.push_chunk(b"one\n"));
    events.extend(normalizer.finish());

    let deltas: String = events
        .iter()
        .filter(|e| e.event_type == event_types::MESSAGE_DELTA)
        .filter_map(|e| e.content())
        .collect();
    assert_eq!(deltas, "# Plan\n\n- step one\n");

    let completed = events.last().unwrap();
    assert_eq!(completed.event_type, event_types::MESSAGE_COMPLETED);
    assert_eq!(completed.content(), Some("# Plan\n\n- step one\n"));
    assert_eq!(normalizer.accumulated_text(), "# Plan\n\n- step one\n");
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_jsonl_events(sizes in prop::collection::vec(1usize..64, 1..16)) {
        let whole = run_chunks(
            OutputNormalizer::jsonl(Box::new(CodexAdapter)),
            CODEX_TRANSCRIPT.as_bytes(),
            &[CODEX_TRANSCRIPT.len()],
        );
        let split = run_chunks(
            OutputNormalizer::jsonl(Box::new(CodexAdapter)),
            CODEX_TRANSCRIPT.as_bytes(),
            &sizes,
        );
        prop_assert_eq!(whole, split);
    }

    #[test]
    fn prop_plain_text_survives_any_chunking(
        text in "[a-z #\\-\\n\u{e9}\u{4e2d}\u{1f600}]{0,80}",
        sizes in prop::collection::vec(1usize..8, 1..8),
    ) {
        let events = run_chunks(OutputNormalizer::plain(), text.as_bytes(), &sizes);
        let deltas: String = events
            .iter()
            .filter(|e| e.event_type == event_types::MESSAGE_DELTA)
            .filter_map(|e| e.content())
            .collect();
        prop_assert_eq!(&deltas, &text);
        let completed = events.last().and_then(|e| e.content()).unwrap_or_default();
        prop_assert_eq!(completed, text.as_str());
    }
}
