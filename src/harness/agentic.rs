//! The single-channel agent loop.
//!
//! Turn structure: send the transcript, execute every tool call the
//! model declared, append one result message per call id, repeat. The
//! loop ends when the model calls `report_back`, when the turn budget or
//! wall clock runs out, or when the transport fails. History repair,
//! sanitization, and truncation run before every send.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::client::LlmClient;
use super::history::{
    DEFAULT_HISTORY_LIMIT, repair_tool_call_integrity, sanitize_assistant_message,
    truncate_messages,
};
use super::message::{ChatMessage, ChatRequest, Role};
use super::tools::{REPORT_BACK, ToolExecutor};
use super::trace_sink::{TraceWriter, TurnBody};
use super::{RawReturnedFiles, SearchBounds, SearchHarness, SearchOutcome};
use crate::core::trace::{LlmResponseRecord, ToolResultRecord, UsageRecord};

const SYSTEM_PROMPT: &str = "You are a code-localization agent. Given an issue \
description and a repository, find the files and line ranges a fix would \
modify. Investigate with the available tools, then deliver your final answer \
with the report_back tool. Ranges are 1-indexed and inclusive; paths are \
relative to the repository root.";

/// Model parameters for one harness instance.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub model: String,
    pub temperature: f64,
    pub bounds: SearchBounds,
    pub history_limit: usize,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            bounds: SearchBounds::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

pub struct AgenticSearchHarness {
    client: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    settings: HarnessSettings,
}

impl AgenticSearchHarness {
    pub fn new(client: Arc<dyn LlmClient>, executor: ToolExecutor, settings: HarnessSettings) -> Self {
        Self {
            client,
            executor,
            settings,
        }
    }

    /// Run with an existing transcript seed; the dual harness reuses this
    /// to brief each channel differently.
    pub(crate) fn run_with_messages(
        &self,
        mut messages: Vec<ChatMessage>,
        trace: &mut TraceWriter,
    ) -> Result<SearchOutcome> {
        let bounds = &self.settings.bounds;
        let deadline = bounds.total_timeout.map(|t| Instant::now() + t);
        let tool_defs = self.executor.channel().definitions();

        for turn in 1..=bounds.max_turns {
            repair_tool_call_integrity(&mut messages);
            messages = truncate_messages(messages, self.settings.history_limit);

            let request = ChatRequest {
                model: self.settings.model.clone(),
                messages: messages
                    .iter()
                    .map(|m| {
                        if m.role == Role::Assistant {
                            sanitize_assistant_message(m)
                        } else {
                            m.clone()
                        }
                    })
                    .collect(),
                temperature: Some(self.settings.temperature),
                max_tokens: None,
                tools: tool_defs.clone(),
            };

            let llm_start = Instant::now();
            let response = match self.client.chat(&request) {
                Ok(r) => r,
                Err(err) => {
                    warn!(turn, %err, "LLM call failed");
                    return Ok(SearchOutcome {
                        files: RawReturnedFiles::new(),
                        turns_used: turn - 1,
                        partial: true,
                        explanation: None,
                        error: Some(format!("llm_error: {err:#}")),
                    });
                }
            };
            let llm_latency_ms = llm_start.elapsed().as_secs_f64() * 1000.0;

            messages.push(response.to_message());

            let mut tool_results: Vec<ToolResultRecord> = Vec::new();
            let mut report: Option<ParsedReport> = None;

            for call in &response.tool_calls {
                let result = if call.name == REPORT_BACK {
                    match parse_report(&call.arguments) {
                        Ok(parsed) => {
                            // First report wins if the model sends several
                            if report.is_none() {
                                report = Some(parsed);
                            }
                            "final answer recorded".to_string()
                        }
                        Err(err) => format!("Error: invalid report_back payload: {err:#}"),
                    }
                } else {
                    self.executor.execute(call)
                };

                tool_results.push(ToolResultRecord {
                    name: call.name.clone(),
                    result: result.clone(),
                });
                messages.push(ChatMessage::tool_result(&call.id, &result));
            }

            trace.record(TurnBody {
                tool_results,
                report_back: report.as_ref().map(|r| {
                    json!({
                        "files": r.files,
                        "explanation": r.explanation,
                    })
                }),
                llm_latency_ms,
                llm_response: Some(LlmResponseRecord {
                    usage: Some(UsageRecord {
                        prompt_tokens: response.usage.prompt_tokens,
                        completion_tokens: response.usage.completion_tokens,
                    }),
                }),
            })?;

            if let Some(report) = report {
                debug!(turn, files = report.files.len(), "report_back received");
                return Ok(SearchOutcome {
                    files: report.files,
                    turns_used: turn,
                    partial: false,
                    explanation: report.explanation,
                    error: None,
                });
            }

            if response.tool_calls.is_empty() {
                // Plain text without a report leads nowhere; steer the
                // model toward the terminal tool
                messages.push(ChatMessage::user(
                    "Continue investigating, or deliver your answer with the report_back tool.",
                ));
            }

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                warn!(turn, "total timeout exceeded");
                return Ok(SearchOutcome {
                    files: RawReturnedFiles::new(),
                    turns_used: turn,
                    partial: true,
                    explanation: None,
                    error: Some("timeout".to_string()),
                });
            }
        }

        // Turn budget exhausted without a report: partial, but not an error
        Ok(SearchOutcome {
            files: RawReturnedFiles::new(),
            turns_used: bounds.max_turns,
            partial: true,
            explanation: None,
            error: None,
        })
    }
}

impl SearchHarness for AgenticSearchHarness {
    fn run(&self, query: &str, trace: &mut TraceWriter) -> Result<SearchOutcome> {
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(query)];
        self.run_with_messages(messages, trace)
    }
}

struct ParsedReport {
    files: RawReturnedFiles,
    explanation: Option<String>,
}

/// Lenient report parsing: the files map must be present and well-typed,
/// but individual range pairs are passed through for the runner's
/// validation pass.
fn parse_report(arguments: &str) -> Result<ParsedReport> {
    #[derive(Deserialize)]
    struct Args {
        files: BTreeMap<String, Vec<Vec<i64>>>,
        #[serde(default)]
        explanation: Option<String>,
    }

    let args: Args = serde_json::from_str(arguments)?;
    Ok(ParsedReport {
        files: args.files,
        explanation: args.explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::message::{ChatResponse, TokenUsage, ToolCall};
    use crate::harness::tools::ToolChannel;
    use crate::parsers::index::IndexerRegistry;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted client: pops one canned response per call.
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

    fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.to_string(),
        }
    }

    fn response_with_calls(calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: calls,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            },
            finish_reason: Some("tool_calls".into()),
            extra: Default::default(),
        }
    }

    fn harness(client: ScriptedClient, repo: &std::path::Path) -> AgenticSearchHarness {
        let registry =
            Arc::new(IndexerRegistry::with_languages(&["python".to_string()]).unwrap());
        let executor = ToolExecutor::new(repo, registry, ToolChannel::Full).unwrap();
        AgenticSearchHarness::new(
            Arc::new(client),
            executor,
            HarnessSettings {
                bounds: SearchBounds {
                    max_turns: 4,
                    total_timeout: None,
                    turn_timeout: None,
                },
                ..HarnessSettings::default()
            },
        )
    }

    #[test]
    fn searches_then_reports() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():\n    return 1\n").unwrap();

        let client = ScriptedClient::new(vec![
            response_with_calls(vec![tool_call(
                "tc1",
                "grep_search",
                serde_json::json!({"pattern": "def f"}),
            )]),
            response_with_calls(vec![tool_call(
                "tc2",
                REPORT_BACK,
                serde_json::json!({"files": {"a.py": [[1, 2]]}, "explanation": "found it"}),
            )]),
        ]);

        let h = harness(client, dir.path());
        let mut trace = TraceWriter::in_memory();
        let outcome = h.run("where is f defined", &mut trace).unwrap();

        assert!(!outcome.partial);
        assert_eq!(outcome.turns_used, 2);
        assert_eq!(outcome.files["a.py"], vec![vec![1, 2]]);
        assert_eq!(outcome.explanation.as_deref(), Some("found it"));

        // Trace: two turns, report_back on the last
        let turns = trace.recorded();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].tool_results[0].name, "grep_search");
        assert!(turns[1].report_back.is_some());
        assert_eq!(turns[1].turn, 2);
    }

    #[test]
    fn turn_budget_exhaustion_is_partial_without_error() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

        // Four turns of searching, never reporting
        let responses = (0..4)
            .map(|i| {
                response_with_calls(vec![tool_call(
                    &format!("tc{i}"),
                    "glob",
                    serde_json::json!({"pattern": "**/*.py"}),
                )])
            })
            .collect();
        let client = ScriptedClient::new(responses);

        let h = harness(client, dir.path());
        let mut trace = TraceWriter::in_memory();
        let outcome = h.run("query", &mut trace).unwrap();

        assert!(outcome.partial);
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.turns_used, 4);
        assert!(outcome.files.is_empty());
        assert_eq!(trace.recorded().len(), 4);
    }

    #[test]
    fn transport_failure_becomes_partial_with_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = ScriptedClient::new(vec![]); // immediately exhausted

        let h = harness(client, dir.path());
        let mut trace = TraceWriter::in_memory();
        let outcome = h.run("query", &mut trace).unwrap();

        assert!(outcome.partial);
        assert!(outcome.error.as_deref().unwrap_or("").starts_with("llm_error:"));
        assert_eq!(outcome.turns_used, 0);
    }

    #[test]
    fn invalid_report_payload_keeps_searching() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

        let client = ScriptedClient::new(vec![
            response_with_calls(vec![tool_call(
                "tc1",
                REPORT_BACK,
                serde_json::json!({"wrong_key": 1}),
            )]),
            response_with_calls(vec![tool_call(
                "tc2",
                REPORT_BACK,
                serde_json::json!({"files": {"a.py": [[1, 1]]}}),
            )]),
        ]);

        let h = harness(client, dir.path());
        let mut trace = TraceWriter::in_memory();
        let outcome = h.run("query", &mut trace).unwrap();

        assert!(!outcome.partial);
        assert_eq!(outcome.turns_used, 2);
        // The failed report surfaced as a failed tool call
        assert!(trace.recorded()[0].tool_results[0].result.starts_with("Error:"));
    }

    #[test]
    fn zero_tool_turns_are_traced_and_nudged() {
        let dir = tempfile::TempDir::new().unwrap();

        let text_only = ChatResponse {
            content: Some("I think it's in a.py".into()),
            ..ChatResponse::default()
        };
        let client = ScriptedClient::new(vec![
            text_only,
            response_with_calls(vec![tool_call(
                "tc1",
                REPORT_BACK,
                serde_json::json!({"files": {"a.py": [[1, 1]]}}),
            )]),
        ]);

        let h = harness(client, dir.path());
        let mut trace = TraceWriter::in_memory();
        let outcome = h.run("query", &mut trace).unwrap();

        assert!(!outcome.partial);
        assert_eq!(trace.recorded()[0].tool_results.len(), 0);
        assert_eq!(trace.recorded()[0].turn, 1);
    }
}
