//! Dual-channel harness behavior with a scripted provider.
//!
//! Exercises the full lexical → semantic → merger sequence against a
//! real on-disk fixture repo, including trace turn continuity and the
//! mechanical fallback when the merger fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use locbench::harness::agentic::HarnessSettings;
use locbench::harness::message::{ChatRequest, ChatResponse, TokenUsage, ToolCall};
use locbench::harness::{
    DualChannelHarness, LlmClient, SearchBounds, SearchHarness, TraceWriter,
};
use locbench::parsers::index::IndexerRegistry;

/// Pops one canned response per chat call; errors once exhausted.
struct ScriptedClient {
    responses: Vec<ChatResponse>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }
}

impl LlmClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(i)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

fn report_call(id: &str, files: serde_json::Value) -> ChatResponse {
    ChatResponse {
        content: None,
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: "report_back".to_string(),
            arguments: serde_json::json!({"files": files}).to_string(),
        }],
        usage: TokenUsage {
            prompt_tokens: 50,
            completion_tokens: 10,
            total_tokens: 60,
        },
        finish_reason: Some("tool_calls".into()),
        extra: Default::default(),
    }
}

fn fixture_repo() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("a.py"),
        "def alpha():\n    return 1\n\n\ndef beta():\n    return alpha()\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("b.py"), "def gamma():\n    return 3\n").unwrap();
    dir
}

fn settings() -> HarnessSettings {
    HarnessSettings {
        bounds: SearchBounds {
            max_turns: 3,
            total_timeout: None,
            turn_timeout: None,
        },
        ..HarnessSettings::default()
    }
}

#[test]
fn channels_then_merger_produce_the_final_answer() {
    let repo = fixture_repo();
    let registry = Arc::new(IndexerRegistry::with_languages(&["python".to_string()]).unwrap());

    // Call order: lexical channel, semantic channel, merger
    let client = ScriptedClient::new(vec![
        report_call("lex", serde_json::json!({"a.py": [[1, 2]]})),
        report_call("sem", serde_json::json!({"b.py": [[1, 2]]})),
        report_call("merge", serde_json::json!({"a.py": [[1, 2]], "b.py": [[1, 2]]})),
    ]);

    let harness = DualChannelHarness::new(Arc::new(client), repo.path(), registry, settings());
    let mut trace = TraceWriter::in_memory();
    let outcome = harness.run("find alpha and gamma", &mut trace).unwrap();

    assert!(!outcome.partial);
    assert_eq!(outcome.files.len(), 2);
    // One turn per channel plus the merger turn
    assert_eq!(outcome.turns_used, 3);

    // Trace turns are strictly monotonic across channels and merger
    let turns: Vec<u32> = trace.recorded().iter().map(|t| t.turn).collect();
    assert_eq!(turns, vec![1, 2, 3]);
    assert!(trace.recorded()[2].report_back.is_some());
}

#[test]
fn merger_additions_are_dropped() {
    let repo = fixture_repo();
    let registry = Arc::new(IndexerRegistry::with_languages(&["python".to_string()]).unwrap());

    let client = ScriptedClient::new(vec![
        report_call("lex", serde_json::json!({"a.py": [[1, 2]]})),
        report_call("sem", serde_json::json!({"b.py": [[1, 2]]})),
        // Merger invents a file neither channel saw
        report_call(
            "merge",
            serde_json::json!({"a.py": [[1, 2]], "phantom.py": [[1, 9]]}),
        ),
    ]);

    let harness = DualChannelHarness::new(Arc::new(client), repo.path(), registry, settings());
    let mut trace = TraceWriter::in_memory();
    let outcome = harness.run("query", &mut trace).unwrap();

    assert!(outcome.files.contains_key("a.py"));
    assert!(!outcome.files.contains_key("phantom.py"));
}

#[test]
fn merger_failure_falls_back_to_mechanical_union() {
    let repo = fixture_repo();
    let registry = Arc::new(IndexerRegistry::with_languages(&["python".to_string()]).unwrap());

    // Channels overlap on a.py with touching ranges; the script runs dry
    // before the merger call
    let client = ScriptedClient::new(vec![
        report_call("lex", serde_json::json!({"a.py": [[1, 3]]})),
        report_call("sem", serde_json::json!({"a.py": [[3, 6]], "b.py": [[1, 2]]})),
    ]);

    let harness = DualChannelHarness::new(Arc::new(client), repo.path(), registry, settings());
    let mut trace = TraceWriter::in_memory();
    let outcome = harness.run("query", &mut trace).unwrap();

    assert!(outcome.partial);
    assert!(
        outcome
            .explanation
            .as_deref()
            .unwrap_or("")
            .starts_with("[FALLBACK]")
    );
    // Union with range merging
    assert_eq!(outcome.files["a.py"], vec![vec![1, 6]]);
    assert_eq!(outcome.files["b.py"], vec![vec![1, 2]]);
}

#[test]
fn failing_channels_still_produce_an_outcome() {
    let repo = fixture_repo();
    let registry = Arc::new(IndexerRegistry::with_languages(&["python".to_string()]).unwrap());

    // Script is empty: both channels and the merger fail
    let client = ScriptedClient::new(vec![]);

    let harness = DualChannelHarness::new(Arc::new(client), repo.path(), registry, settings());
    let mut trace = TraceWriter::in_memory();
    let outcome = harness.run("query", &mut trace).unwrap();

    assert!(outcome.partial);
    assert!(outcome.files.is_empty());
    assert!(outcome.error.is_some());
}
