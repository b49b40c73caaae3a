//! Agent-behavior analysis over per-turn traces.
//!
//! The harness writes one `TurnRecord` per turn into a per-case JSONL
//! file. This module answers the behavioral questions asked of a batch:
//! when the agent reports back, how its tool usage trends across turns,
//! whether it orients with a directory listing first, where it idles, and
//! which tools fail.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::infra::jsonl;

/// One executed tool call inside a turn. Failures are recognized by the
/// `Error:` prefix on the result string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub name: String,
    pub result: String,
}

impl ToolResultRecord {
    pub fn is_failure(&self) -> bool {
        self.result.starts_with("Error:")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponseRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageRecord>,
}

/// One agent turn as persisted by the harness. `turn` starts at 1 and is
/// strictly monotonic within a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u32,

    #[serde(default)]
    pub tool_results: Vec<ToolResultRecord>,

    /// The terminal payload, present on at most the reporting turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_back: Option<serde_json::Value>,

    #[serde(default)]
    pub llm_latency_ms: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_response: Option<LlmResponseRecord>,
}

/// Tool-call frequency shape across a case's turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Flat,
    Decreasing,
    Increasing,
    Irregular,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trend::Flat => "flat",
            Trend::Decreasing => "decreasing",
            Trend::Increasing => "increasing",
            Trend::Irregular => "irregular",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedToolCall {
    pub turn: u32,
    pub name: String,
    pub error_preview: String,
}

/// Per-case behavioral features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceAnalysis {
    pub case_id: String,
    pub total_turns: usize,

    pub report_back_turn: Option<u32>,
    pub report_back_on_last_turn: bool,

    pub tool_calls_per_turn: Vec<usize>,
    pub tool_frequency_trend: Trend,

    pub view_directory_in_first_turn: bool,
    pub zero_tool_call_turns: Vec<u32>,

    pub has_failed_tool_calls: bool,
    pub failed_tool_calls: Vec<FailedToolCall>,

    pub total_llm_latency_ms: f64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub tool_type_counts: IndexMap<String, u64>,
}

/// ≥70 % negative diffs → decreasing; ≥70 % positive → increasing; all
/// zero → flat; anything else irregular.
pub fn classify_trend(counts: &[usize]) -> Trend {
    if counts.len() <= 1 {
        return Trend::Flat;
    }

    let diffs: Vec<i64> = counts
        .windows(2)
        .map(|w| w[1] as i64 - w[0] as i64)
        .collect();

    if diffs.iter().all(|&d| d == 0) {
        return Trend::Flat;
    }

    let total = diffs.len() as f64;
    let neg = diffs.iter().filter(|&&d| d < 0).count() as f64;
    let pos = diffs.iter().filter(|&&d| d > 0).count() as f64;

    if neg / total >= 0.7 {
        Trend::Decreasing
    } else if pos / total >= 0.7 {
        Trend::Increasing
    } else {
        Trend::Irregular
    }
}

/// Analyze already-loaded turns for one case.
pub fn analyze_turns(case_id: &str, turns: &[TurnRecord]) -> TraceAnalysis {
    let total_turns = turns.len();

    let mut total_llm_latency_ms = 0.0;
    let mut total_prompt_tokens = 0;
    let mut total_completion_tokens = 0;
    let mut tool_type_counts: IndexMap<String, u64> = IndexMap::new();

    for t in turns {
        total_llm_latency_ms += t.llm_latency_ms;
        if let Some(usage) = t.llm_response.as_ref().and_then(|r| r.usage.as_ref()) {
            total_prompt_tokens += usage.prompt_tokens;
            total_completion_tokens += usage.completion_tokens;
        }
        for tr in &t.tool_results {
            *tool_type_counts.entry(tr.name.clone()).or_insert(0) += 1;
        }
    }

    let report_back_turn = turns
        .iter()
        .find(|t| t.report_back.is_some())
        .map(|t| t.turn);
    let report_back_on_last_turn =
        total_turns > 0 && report_back_turn == Some(turns[total_turns - 1].turn);

    let tool_calls_per_turn: Vec<usize> = turns.iter().map(|t| t.tool_results.len()).collect();

    // A final report-only turn says nothing about search behavior; keep it
    // out of the trend.
    let trend_counts: &[usize] = if report_back_on_last_turn && tool_calls_per_turn.len() > 1 {
        &tool_calls_per_turn[..tool_calls_per_turn.len() - 1]
    } else {
        &tool_calls_per_turn
    };
    let tool_frequency_trend = classify_trend(trend_counts);

    let view_directory_in_first_turn = turns
        .first()
        .map(|t| t.tool_results.iter().any(|tr| tr.name == "view_directory"))
        .unwrap_or(false);

    let zero_tool_call_turns: Vec<u32> = tool_calls_per_turn
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count == 0)
        .map(|(i, _)| i as u32 + 1)
        .collect();

    let failed_tool_calls: Vec<FailedToolCall> = turns
        .iter()
        .flat_map(|t| {
            t.tool_results
                .iter()
                .filter(|tr| tr.is_failure())
                .map(move |tr| FailedToolCall {
                    turn: t.turn,
                    name: tr.name.clone(),
                    error_preview: tr.result.chars().take(200).collect(),
                })
        })
        .collect();

    TraceAnalysis {
        case_id: case_id.to_string(),
        total_turns,
        report_back_turn,
        report_back_on_last_turn,
        tool_calls_per_turn,
        tool_frequency_trend,
        view_directory_in_first_turn,
        zero_tool_call_turns,
        has_failed_tool_calls: !failed_tool_calls.is_empty(),
        failed_tool_calls,
        total_llm_latency_ms,
        total_prompt_tokens,
        total_completion_tokens,
        tool_type_counts,
    }
}

/// Analyze one trace file; the case id is the file stem.
pub fn analyze_trace_file(path: &Path) -> Result<TraceAnalysis> {
    let case_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (turns, _dropped) = jsonl::read_records::<TurnRecord, _>(path)?;
    Ok(analyze_turns(&case_id, &turns))
}

/// Analyze every `*.jsonl` under a trace directory, sorted by name.
pub fn analyze_batch(traces_dir: &Path) -> Result<Vec<TraceAnalysis>> {
    let mut paths: Vec<std::path::PathBuf> = std::fs::read_dir(traces_dir)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", traces_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
        .collect();
    paths.sort();

    paths.iter().map(|p| analyze_trace_file(p)).collect()
}

/// Cross-case aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_cases: usize,

    pub report_back_last_turn: usize,
    pub no_report_back: usize,

    pub trend_counts: IndexMap<String, usize>,
    pub avg_tool_calls_per_position: Vec<f64>,

    pub view_directory_first_turn: usize,

    pub cases_with_zero_tool_call_turns: usize,
    pub zero_turn_positions: Vec<u32>,

    pub cases_with_failed_tool_calls: usize,
    pub top_failed_tools: Vec<(String, u64)>,

    pub avg_llm_latency_ms: f64,
    pub avg_prompt_tokens: f64,
    pub avg_completion_tokens: f64,

    pub top_tool_types: Vec<(String, u64)>,
}

const TOP_FAILED_TOOLS: usize = 10;
const TOP_TOOL_TYPES: usize = 15;

pub fn aggregate_summary(analyses: &[TraceAnalysis]) -> TraceSummary {
    let n = analyses.len();
    if n == 0 {
        return TraceSummary {
            total_cases: 0,
            report_back_last_turn: 0,
            no_report_back: 0,
            trend_counts: IndexMap::new(),
            avg_tool_calls_per_position: Vec::new(),
            view_directory_first_turn: 0,
            cases_with_zero_tool_call_turns: 0,
            zero_turn_positions: Vec::new(),
            cases_with_failed_tool_calls: 0,
            top_failed_tools: Vec::new(),
            avg_llm_latency_ms: 0.0,
            avg_prompt_tokens: 0.0,
            avg_completion_tokens: 0.0,
            top_tool_types: Vec::new(),
        };
    }
    let nf = n as f64;

    let mut trend_counts: IndexMap<String, usize> = IndexMap::new();
    for a in analyses {
        *trend_counts.entry(a.tool_frequency_trend.to_string()).or_insert(0) += 1;
    }
    trend_counts.sort_by(|_, v1, _, v2| v2.cmp(v1));

    let max_turns = analyses.iter().map(|a| a.total_turns).max().unwrap_or(0);
    let mut avg_tool_calls_per_position = Vec::with_capacity(max_turns);
    for pos in 0..max_turns {
        let values: Vec<usize> = analyses
            .iter()
            .filter_map(|a| a.tool_calls_per_turn.get(pos).copied())
            .collect();
        let avg = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<usize>() as f64 / values.len() as f64
        };
        avg_tool_calls_per_position.push((avg * 10.0).round() / 10.0);
    }

    let mut failed_counter: IndexMap<String, u64> = IndexMap::new();
    for a in analyses {
        for fc in &a.failed_tool_calls {
            *failed_counter.entry(fc.name.clone()).or_insert(0) += 1;
        }
    }
    let top_failed_tools = top_n(failed_counter, TOP_FAILED_TOOLS);

    let mut tool_counter: IndexMap<String, u64> = IndexMap::new();
    for a in analyses {
        for (name, count) in &a.tool_type_counts {
            *tool_counter.entry(name.clone()).or_insert(0) += count;
        }
    }
    let top_tool_types = top_n(tool_counter, TOP_TOOL_TYPES);

    let zero_turn_positions: Vec<u32> = analyses
        .iter()
        .flat_map(|a| a.zero_tool_call_turns.iter().copied())
        .sorted()
        .dedup()
        .collect();

    TraceSummary {
        total_cases: n,
        report_back_last_turn: analyses.iter().filter(|a| a.report_back_on_last_turn).count(),
        no_report_back: analyses.iter().filter(|a| a.report_back_turn.is_none()).count(),
        trend_counts,
        avg_tool_calls_per_position,
        view_directory_first_turn: analyses
            .iter()
            .filter(|a| a.view_directory_in_first_turn)
            .count(),
        cases_with_zero_tool_call_turns: analyses
            .iter()
            .filter(|a| !a.zero_tool_call_turns.is_empty())
            .count(),
        zero_turn_positions,
        cases_with_failed_tool_calls: analyses
            .iter()
            .filter(|a| a.has_failed_tool_calls)
            .count(),
        top_failed_tools,
        avg_llm_latency_ms: analyses.iter().map(|a| a.total_llm_latency_ms).sum::<f64>() / nf,
        avg_prompt_tokens: analyses.iter().map(|a| a.total_prompt_tokens as f64).sum::<f64>() / nf,
        avg_completion_tokens: analyses
            .iter()
            .map(|a| a.total_completion_tokens as f64)
            .sum::<f64>()
            / nf,
        top_tool_types,
    }
}

fn top_n(counter: IndexMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    counter
        .into_iter()
        .sorted_by(|(ka, va), (kb, vb)| vb.cmp(va).then_with(|| ka.cmp(kb)))
        .take(n)
        .collect()
}

/// Human-readable multi-section report.
pub fn format_report(analyses: &[TraceAnalysis]) -> String {
    let summary = aggregate_summary(analyses);
    let n = summary.total_cases;
    if n == 0 {
        return "No trace data found.".to_string();
    }
    let nf = n as f64;
    let pct = |count: usize| format!("{:.1}%", count as f64 / nf * 100.0);

    let mut lines: Vec<String> = Vec::new();
    lines.push("=".repeat(58));
    lines.push(format!("TRACE ANALYSIS REPORT ({n} cases)"));
    lines.push("=".repeat(58));

    let rb_last = summary.report_back_last_turn;
    let rb_none = summary.no_report_back;
    lines.push(String::new());
    lines.push("Report-back position".to_string());
    lines.push(format!(
        "  report_back on final turn: {rb_last}/{n} ({})",
        pct(rb_last)
    ));
    lines.push(format!(
        "  not on final turn:         {}/{n} ({})",
        n - rb_last - rb_none,
        pct(n - rb_last - rb_none)
    ));
    if rb_none > 0 {
        lines.push(format!("  no report_back:            {rb_none}/{n} ({})", pct(rb_none)));
    }

    lines.push(String::new());
    lines.push("Tool-call frequency trend".to_string());
    for (trend, count) in &summary.trend_counts {
        lines.push(format!("  {trend:<20}: {count}/{n} ({})", pct(*count)));
    }
    if !summary.avg_tool_calls_per_position.is_empty() {
        let preview: Vec<f64> = summary
            .avg_tool_calls_per_position
            .iter()
            .copied()
            .take(10)
            .collect();
        lines.push(format!("  Avg tool calls per turn: {preview:?}"));
    }

    let vd = summary.view_directory_first_turn;
    lines.push(String::new());
    lines.push("Orientation".to_string());
    lines.push(format!(
        "  first turn includes view_directory: {vd}/{n} ({})",
        pct(vd)
    ));

    let hz = summary.cases_with_zero_tool_call_turns;
    lines.push(String::new());
    lines.push("Turns with zero tool calls".to_string());
    lines.push(format!("  cases with a 0-tool-call turn: {hz}/{n} ({})", pct(hz)));
    if !summary.zero_turn_positions.is_empty() {
        lines.push(format!("  affected turns: {:?}", summary.zero_turn_positions));
    }

    let hf = summary.cases_with_failed_tool_calls;
    lines.push(String::new());
    lines.push("Failed tool calls".to_string());
    lines.push(format!("  cases with failed tools: {hf}/{n} ({})", pct(hf)));
    if !summary.top_failed_tools.is_empty() {
        let parts: Vec<String> = summary
            .top_failed_tools
            .iter()
            .map(|(name, count)| format!("{name} ({count})"))
            .collect();
        lines.push(format!("  most common failed tools: {}", parts.join(", ")));
    }

    lines.push(String::new());
    lines.push("LLM latency and token usage".to_string());
    lines.push(format!("  Avg LLM latency: {:.0}ms", summary.avg_llm_latency_ms));
    lines.push(format!("  Avg prompt tokens: {:.0}", summary.avg_prompt_tokens));
    lines.push(format!(
        "  Avg completion tokens: {:.0}",
        summary.avg_completion_tokens
    ));

    lines.push(String::new());
    lines.push("Tool type distribution".to_string());
    for (name, count) in &summary.top_tool_types {
        lines.push(format!("  {name:<30}: {count}"));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(n: u32, tools: &[&str]) -> TurnRecord {
        TurnRecord {
            turn: n,
            tool_results: tools
                .iter()
                .map(|name| ToolResultRecord {
                    name: name.to_string(),
                    result: "ok".to_string(),
                })
                .collect(),
            report_back: None,
            llm_latency_ms: 100.0,
            llm_response: Some(LlmResponseRecord {
                usage: Some(UsageRecord {
                    prompt_tokens: 50,
                    completion_tokens: 10,
                }),
            }),
        }
    }

    fn turns_with_counts(counts: &[usize]) -> Vec<TurnRecord> {
        counts
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let tools: Vec<&str> = std::iter::repeat_n("grep_search", c).collect();
                turn(i as u32 + 1, &tools)
            })
            .collect()
    }

    #[test]
    fn trend_classification_matrix() {
        assert_eq!(classify_trend(&[5, 4, 3, 2, 1]), Trend::Decreasing);
        assert_eq!(classify_trend(&[1, 1, 1, 1]), Trend::Flat);
        assert_eq!(classify_trend(&[1, 5, 2, 6, 3]), Trend::Irregular);
        assert_eq!(classify_trend(&[1, 2, 3, 4]), Trend::Increasing);
        assert_eq!(classify_trend(&[3]), Trend::Flat);
        assert_eq!(classify_trend(&[]), Trend::Flat);
    }

    #[test]
    fn final_report_turn_is_excluded_from_trend() {
        let mut turns = turns_with_counts(&[5, 4, 3, 2, 1]);
        turns[4].report_back = Some(serde_json::json!({"files": {}}));

        let analysis = analyze_turns("case", &turns);
        assert_eq!(analysis.report_back_turn, Some(5));
        assert!(analysis.report_back_on_last_turn);
        // Trend computed over [5, 4, 3, 2]
        assert_eq!(analysis.tool_frequency_trend, Trend::Decreasing);
    }

    #[test]
    fn detects_first_turn_orientation_and_idle_turns() {
        let mut turns = turns_with_counts(&[0, 2, 0]);
        turns[0].tool_results.push(ToolResultRecord {
            name: "view_directory".into(),
            result: "listing".into(),
        });

        let analysis = analyze_turns("case", &turns);
        assert!(analysis.view_directory_in_first_turn);
        assert_eq!(analysis.zero_tool_call_turns, vec![3]);
    }

    #[test]
    fn failed_calls_keyed_on_error_prefix() {
        let mut turns = turns_with_counts(&[1]);
        turns[0].tool_results.push(ToolResultRecord {
            name: "view_file".into(),
            result: "Error: no such file".into(),
        });

        let analysis = analyze_turns("case", &turns);
        assert!(analysis.has_failed_tool_calls);
        assert_eq!(analysis.failed_tool_calls.len(), 1);
        assert_eq!(analysis.failed_tool_calls[0].name, "view_file");
    }

    #[test]
    fn totals_accumulate_latency_and_tokens() {
        let analysis = analyze_turns("case", &turns_with_counts(&[1, 1, 1]));
        assert!((analysis.total_llm_latency_ms - 300.0).abs() < 1e-9);
        assert_eq!(analysis.total_prompt_tokens, 150);
        assert_eq!(analysis.total_completion_tokens, 30);
        assert_eq!(analysis.tool_type_counts["grep_search"], 3);
    }

    #[test]
    fn aggregate_counts_and_positions() {
        let a = analyze_turns("a", &turns_with_counts(&[3, 2, 1]));
        let b = analyze_turns("b", &turns_with_counts(&[1, 0]));
        let summary = aggregate_summary(&[a, b]);

        assert_eq!(summary.total_cases, 2);
        assert_eq!(summary.cases_with_zero_tool_call_turns, 1);
        assert_eq!(summary.zero_turn_positions, vec![2]);
        // Position 1 average: (3 + 1) / 2
        assert_eq!(summary.avg_tool_calls_per_position[0], 2.0);
    }

    #[test]
    fn empty_batch_formats_cleanly() {
        assert_eq!(format_report(&[]), "No trace data found.");
    }
}
