//! `locbench report`: summarize a finished run.
//!
//! Accepts either the aggregate `.report.json` or the per-case results
//! `.jsonl`; the latter is re-aggregated on the fly so partial runs can
//! be inspected before their report exists.

use anyhow::{Context, Result};
use indexmap::IndexMap;

use crate::cli::{AppContext, ReportArgs};
use crate::core::results::{BenchmarkSummary, ResultsStore, aggregate_stats};

pub fn run(args: ReportArgs, _ctx: &AppContext) -> Result<()> {
    let is_report_json = args
        .path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext == "json");

    if is_report_json {
        let text = std::fs::read_to_string(&args.path)
            .with_context(|| format!("Failed to read {}", args.path.display()))?;
        let summary: BenchmarkSummary =
            serde_json::from_str(&text).context("Failed to parse report JSON")?;

        println!("run:        {}", summary.metadata.run_id);
        println!("dataset:    {}", summary.metadata.dataset.dataset_path);
        if let Some(sha) = &summary.metadata.dataset.dataset_sha256 {
            println!("dataset sha256: {sha}");
        }
        println!(
            "provider:   {} ({})",
            summary.metadata.provider.name, summary.metadata.provider.model
        );
        println!(
            "started:    {}  duration: {:.1}s",
            summary.metadata.started_at_utc, summary.metadata.duration_s
        );
        println!();
        print_stats(&summary.aggregate_stats, summary.total_cases);
    } else {
        let results = ResultsStore::load_results(&args.path)?;
        let stats = aggregate_stats(&results);
        print_stats(&stats, results.len());
    }

    Ok(())
}

/// Shared stat rendering for `run` and `report`.
pub fn print_stats(stats: &IndexMap<String, f64>, total_cases: usize) {
    println!("{total_cases} cases");
    for (name, value) in stats {
        // Ratio-like metrics read better as percentages
        if name.contains("rate") || name.contains("recall") || name.contains("precision")
            || name.contains("coverage") || name.contains("f_beta") || name.contains("iou")
        {
            println!("  {name:<36} {:.1}%", value * 100.0);
        } else {
            println!("  {name:<36} {value:.1}");
        }
    }
}
