//! Trace-analysis behavior over real JSONL files on disk.

use std::path::Path;

use locbench::core::trace::{
    Trend, analyze_batch, analyze_trace_file, format_report,
};

/// Write a trace file of turns with the given tool-call counts; the last
/// turn optionally carries a report_back.
fn write_trace(dir: &Path, case_id: &str, counts: &[usize], report_on_last: bool) {
    let mut lines = Vec::new();
    for (i, &count) in counts.iter().enumerate() {
        let turn = i + 1;
        let tools: Vec<serde_json::Value> = (0..count)
            .map(|_| serde_json::json!({"name": "grep_search", "result": "ok"}))
            .collect();
        let mut record = serde_json::json!({
            "turn": turn,
            "tool_results": tools,
            "llm_latency_ms": 120.0,
            "llm_response": {"usage": {"prompt_tokens": 40, "completion_tokens": 8}}
        });
        if report_on_last && turn == counts.len() {
            record["report_back"] = serde_json::json!({"files": {"a.py": [[1, 2]]}});
        }
        lines.push(record.to_string());
    }
    std::fs::write(dir.join(format!("{case_id}.jsonl")), lines.join("\n") + "\n").unwrap();
}

#[test]
fn s6_trend_classification_from_disk() {
    let dir = tempfile::TempDir::new().unwrap();

    write_trace(dir.path(), "decreasing", &[5, 4, 3, 2, 1], false);
    write_trace(dir.path(), "flat", &[1, 1, 1, 1], false);
    write_trace(dir.path(), "irregular", &[1, 5, 2, 6, 3], false);

    let decreasing = analyze_trace_file(&dir.path().join("decreasing.jsonl")).unwrap();
    assert_eq!(decreasing.tool_frequency_trend, Trend::Decreasing);

    let flat = analyze_trace_file(&dir.path().join("flat.jsonl")).unwrap();
    assert_eq!(flat.tool_frequency_trend, Trend::Flat);

    let irregular = analyze_trace_file(&dir.path().join("irregular.jsonl")).unwrap();
    assert_eq!(irregular.tool_frequency_trend, Trend::Irregular);
}

#[test]
fn s6_report_on_last_turn_excludes_it_from_trend() {
    let dir = tempfile::TempDir::new().unwrap();
    // Final turn has 1 tool call (the report) and carries report_back;
    // trend over [5,4,3,2] is still decreasing
    write_trace(dir.path(), "case", &[5, 4, 3, 2, 1], true);

    let analysis = analyze_trace_file(&dir.path().join("case.jsonl")).unwrap();
    assert_eq!(analysis.report_back_turn, Some(5));
    assert!(analysis.report_back_on_last_turn);
    assert_eq!(analysis.tool_frequency_trend, Trend::Decreasing);
}

#[test]
fn batch_analysis_is_sorted_and_complete() {
    let dir = tempfile::TempDir::new().unwrap();
    write_trace(dir.path(), "zeta", &[2, 2], false);
    write_trace(dir.path(), "alpha", &[3], true);
    // A non-trace file is ignored
    std::fs::write(dir.path().join("notes.txt"), "not a trace").unwrap();

    let analyses = analyze_batch(dir.path()).unwrap();
    let ids: Vec<&str> = analyses.iter().map(|a| a.case_id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "zeta"]);
}

#[test]
fn report_covers_every_section() {
    let dir = tempfile::TempDir::new().unwrap();
    write_trace(dir.path(), "one", &[4, 3, 1], true);
    write_trace(dir.path(), "two", &[2, 0, 2], false);

    let analyses = analyze_batch(dir.path()).unwrap();
    let report = format_report(&analyses);

    assert!(report.contains("TRACE ANALYSIS REPORT (2 cases)"));
    assert!(report.contains("Report-back position"));
    assert!(report.contains("report_back on final turn: 1/2"));
    assert!(report.contains("Tool-call frequency trend"));
    assert!(report.contains("Turns with zero tool calls"));
    assert!(report.contains("cases with a 0-tool-call turn: 1/2"));
    assert!(report.contains("grep_search"));
    assert!(report.contains("Avg LLM latency"));
}

#[test]
fn malformed_trace_lines_are_skipped() {
    let dir = tempfile::TempDir::new().unwrap();
    let content = format!(
        "{}\nnot json at all\n{}\n",
        serde_json::json!({"turn": 1, "tool_results": [], "llm_latency_ms": 1.0}),
        serde_json::json!({"turn": 2, "tool_results": [], "llm_latency_ms": 1.0}),
    );
    std::fs::write(dir.path().join("case.jsonl"), content).unwrap();

    let analysis = analyze_trace_file(&dir.path().join("case.jsonl")).unwrap();
    assert_eq!(analysis.total_turns, 2);
}
