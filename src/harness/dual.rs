//! The dual-channel harness.
//!
//! Two sub-agents investigate the same query with disjoint tool sets:
//! a lexical channel (grep/glob/view) and a semantic channel
//! (symbol/type/callgraph lookups). A merger agent then gets one
//! additional turn to union and deduplicate their evidence. The merger
//! may not introduce files neither channel saw; if the merger call fails,
//! a mechanical union of the two channels stands in. The runner sees the
//! same [`SearchHarness`] contract as the single-channel loop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, warn};

use super::agentic::{AgenticSearchHarness, HarnessSettings};
use super::client::LlmClient;
use super::message::{ChatMessage, ChatRequest};
use super::tools::{REPORT_BACK, ToolChannel, ToolExecutor, report_back_definition};
use super::trace_sink::{TraceWriter, TurnBody};
use super::{RawReturnedFiles, SearchHarness, SearchOutcome};
use crate::core::ranges;
use crate::core::trace::{LlmResponseRecord, ToolResultRecord, UsageRecord};
use crate::parsers::index::IndexerRegistry;

const LEXICAL_PROMPT: &str = "You are the lexical search channel of a \
code-localization system. Locate the files and line ranges relevant to the \
issue using text search only: grep, glob, and file viewing. Deliver your \
findings with the report_back tool.";

const SEMANTIC_PROMPT: &str = "You are the semantic search channel of a \
code-localization system. Locate the files and line ranges relevant to the \
issue through symbol definitions, declarations, and call relationships. \
Deliver your findings with the report_back tool.";

const MERGER_PROMPT: &str = "You merge the findings of two search channels \
into one final answer. Union and deduplicate their file/range evidence, \
dropping clearly irrelevant entries. Never add files that neither channel \
reported. Answer with the report_back tool.";

/// What one channel contributed.
#[derive(Debug, Clone, Default)]
pub struct ChannelEvidence {
    pub files: RawReturnedFiles,
    pub observations: Vec<String>,
    pub turns_used: u32,
    pub partial: bool,
    pub error: Option<String>,
}

impl ChannelEvidence {
    fn from_outcome(outcome: SearchOutcome) -> Self {
        Self {
            files: outcome.files,
            observations: outcome.explanation.into_iter().collect(),
            turns_used: outcome.turns_used,
            partial: outcome.partial,
            error: outcome.error,
        }
    }
}

pub struct DualChannelHarness {
    client: Arc<dyn LlmClient>,
    repo_root: PathBuf,
    registry: Arc<IndexerRegistry>,

    /// Per-channel settings; the merger reuses model and temperature.
    settings: HarnessSettings,
}

impl DualChannelHarness {
    pub fn new(
        client: Arc<dyn LlmClient>,
        repo_root: &Path,
        registry: Arc<IndexerRegistry>,
        settings: HarnessSettings,
    ) -> Self {
        Self {
            client,
            repo_root: repo_root.to_path_buf(),
            registry,
            settings,
        }
    }

    fn run_channel(
        &self,
        channel: ToolChannel,
        prompt: &'static str,
        query: &str,
        trace: &mut TraceWriter,
    ) -> Result<ChannelEvidence> {
        let executor = ToolExecutor::new(&self.repo_root, self.registry.clone(), channel)?;
        let harness = AgenticSearchHarness::new(self.client.clone(), executor, self.settings.clone());

        let messages = vec![ChatMessage::system(prompt), ChatMessage::user(query)];
        let outcome = harness.run_with_messages(messages, trace)?;
        Ok(ChannelEvidence::from_outcome(outcome))
    }

    /// One merger turn. Returns `None` when the call fails or produces no
    /// usable report, in which case the mechanical fallback applies.
    fn merge(
        &self,
        query: &str,
        lexical: &ChannelEvidence,
        semantic: &ChannelEvidence,
        trace: &mut TraceWriter,
    ) -> Result<Option<(RawReturnedFiles, Option<String>)>> {
        let briefing = json!({
            "query": query,
            "lexical": { "files": lexical.files, "observations": lexical.observations },
            "semantic": { "files": semantic.files, "observations": semantic.observations },
        });

        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(MERGER_PROMPT),
                ChatMessage::user(&briefing.to_string()),
            ],
            temperature: Some(self.settings.temperature),
            max_tokens: None,
            tools: vec![report_back_definition()],
        };

        let llm_start = Instant::now();
        let response = match self.client.chat(&request) {
            Ok(r) => r,
            Err(err) => {
                warn!(%err, "merger call failed");
                return Ok(None);
            }
        };
        let llm_latency_ms = llm_start.elapsed().as_secs_f64() * 1000.0;

        let mut merged: Option<(RawReturnedFiles, Option<String>)> = None;
        let mut tool_results: Vec<ToolResultRecord> = Vec::new();

        for call in &response.tool_calls {
            if call.name != REPORT_BACK {
                tool_results.push(ToolResultRecord {
                    name: call.name.clone(),
                    result: format!("Error: tool '{}' is not available", call.name),
                });
                continue;
            }

            #[derive(serde::Deserialize)]
            struct Args {
                files: RawReturnedFiles,
                #[serde(default)]
                explanation: Option<String>,
            }

            match serde_json::from_str::<Args>(&call.arguments) {
                Ok(args) => {
                    let filtered = restrict_to_seen(args.files, lexical, semantic);
                    if merged.is_none() {
                        merged = Some((filtered, args.explanation));
                    }
                    tool_results.push(ToolResultRecord {
                        name: call.name.clone(),
                        result: "merged answer recorded".to_string(),
                    });
                }
                Err(err) => {
                    tool_results.push(ToolResultRecord {
                        name: call.name.clone(),
                        result: format!("Error: invalid report_back payload: {err:#}"),
                    });
                }
            }
        }

        trace.record(TurnBody {
            tool_results,
            report_back: merged
                .as_ref()
                .map(|(files, explanation)| json!({"files": files, "explanation": explanation})),
            llm_latency_ms,
            llm_response: Some(LlmResponseRecord {
                usage: Some(UsageRecord {
                    prompt_tokens: response.usage.prompt_tokens,
                    completion_tokens: response.usage.completion_tokens,
                }),
            }),
        })?;

        Ok(merged)
    }
}

impl SearchHarness for DualChannelHarness {
    fn run(&self, query: &str, trace: &mut TraceWriter) -> Result<SearchOutcome> {
        let lexical = self.run_channel(ToolChannel::Lexical, LEXICAL_PROMPT, query, trace)?;
        let semantic = self.run_channel(ToolChannel::Semantic, SEMANTIC_PROMPT, query, trace)?;
        let channel_turns = lexical.turns_used + semantic.turns_used;

        match self.merge(query, &lexical, &semantic, trace)? {
            Some((files, explanation)) => {
                debug!(files = files.len(), "merger produced the final answer");
                Ok(SearchOutcome {
                    files,
                    turns_used: channel_turns + 1,
                    partial: lexical.partial || semantic.partial,
                    explanation,
                    error: lexical.error.clone().or_else(|| semantic.error.clone()),
                })
            }
            None => {
                let files = fallback_union(&lexical, &semantic);
                Ok(SearchOutcome {
                    files,
                    turns_used: channel_turns + 1,
                    partial: true,
                    explanation: Some("[FALLBACK] mechanical union of channel evidence".to_string()),
                    error: lexical.error.clone().or_else(|| semantic.error.clone()),
                })
            }
        }
    }
}

/// Drop any merger path neither channel reported.
fn restrict_to_seen(
    files: RawReturnedFiles,
    lexical: &ChannelEvidence,
    semantic: &ChannelEvidence,
) -> RawReturnedFiles {
    files
        .into_iter()
        .filter(|(path, _)| {
            let seen = lexical.files.contains_key(path) || semantic.files.contains_key(path);
            if !seen {
                warn!(path = %path, "merger introduced an unseen file; dropping");
            }
            seen
        })
        .collect()
}

/// Union both channels' files, merging overlapping ranges per path.
fn fallback_union(lexical: &ChannelEvidence, semantic: &ChannelEvidence) -> RawReturnedFiles {
    let mut combined: BTreeMap<String, Vec<Vec<i64>>> = BTreeMap::new();
    for (path, pairs) in lexical.files.iter().chain(semantic.files.iter()) {
        combined
            .entry(path.clone())
            .or_default()
            .extend(pairs.iter().cloned());
    }

    combined
        .into_iter()
        .map(|(path, pairs)| {
            let merged = ranges::normalize(&pairs);
            let raw = merged
                .into_iter()
                .map(|r| vec![i64::from(r.start()), i64::from(r.end())])
                .collect();
            (path, raw)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(entries: &[(&str, &[[i64; 2]])]) -> ChannelEvidence {
        ChannelEvidence {
            files: entries
                .iter()
                .map(|(p, pairs)| {
                    (
                        p.to_string(),
                        pairs.iter().map(|pair| pair.to_vec()).collect(),
                    )
                })
                .collect(),
            observations: Vec::new(),
            turns_used: 3,
            partial: false,
            error: None,
        }
    }

    #[test]
    fn fallback_unions_distinct_files() {
        let lexical = evidence(&[("a.py", &[[1, 10]])]);
        let semantic = evidence(&[("b.py", &[[20, 30]])]);

        let files = fallback_union(&lexical, &semantic);
        assert_eq!(files.len(), 2);
        assert_eq!(files["a.py"], vec![vec![1, 10]]);
        assert_eq!(files["b.py"], vec![vec![20, 30]]);
    }

    #[test]
    fn fallback_merges_overlapping_ranges() {
        let lexical = evidence(&[("a.py", &[[1, 10], [15, 20]])]);
        let semantic = evidence(&[("a.py", &[[8, 18]])]);

        let files = fallback_union(&lexical, &semantic);
        assert_eq!(files.len(), 1);
        assert_eq!(files["a.py"], vec![vec![1, 20]]);
    }

    #[test]
    fn merger_cannot_introduce_unseen_files() {
        let lexical = evidence(&[("a.py", &[[1, 10]])]);
        let semantic = evidence(&[("b.py", &[[5, 6]])]);

        let mut proposed = RawReturnedFiles::new();
        proposed.insert("a.py".into(), vec![vec![1, 10]]);
        proposed.insert("invented.py".into(), vec![vec![1, 2]]);

        let filtered = restrict_to_seen(proposed, &lexical, &semantic);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("a.py"));
    }
}
