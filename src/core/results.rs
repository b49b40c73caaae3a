//! Per-case results, run summaries, and their on-disk forms.
//!
//! Results append to `results/<run-id>.jsonl` in completion order; the
//! aggregate report lands once at `reports/<run-id>.report.json` after
//! the last case. Nothing persisted is ever mutated in place.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::metadata::RunMetadata;
use crate::core::metrics::CaseMetrics;
use crate::core::paths::FileRanges;
use crate::infra::jsonl;

/// Outcome of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub case_id: String,
    pub repo: String,

    /// `!partial && error == None`.
    pub success: bool,

    pub returned_files_count: usize,
    pub ground_truth_files_count: usize,

    #[serde(flatten)]
    pub metrics: CaseMetrics,

    pub turns_used: u32,
    pub latency_ms: f64,
    pub repo_prep_ms: f64,
    pub repo_cached: bool,

    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// What the harness actually returned, for post-hoc inspection.
    #[serde(default, skip_serializing_if = "FileRanges::is_empty")]
    pub returned_files: FileRanges,
}

impl BenchmarkResult {
    /// The zero-scored result a failed case reports.
    pub fn failed(case_id: &str, repo: &str, functions_total: u32, error: String) -> Self {
        Self {
            case_id: case_id.to_string(),
            repo: repo.to_string(),
            success: false,
            returned_files_count: 0,
            ground_truth_files_count: 0,
            metrics: CaseMetrics {
                functions_total,
                ..CaseMetrics::default()
            },
            turns_used: 0,
            latency_ms: 0.0,
            repo_prep_ms: 0.0,
            repo_cached: false,
            partial: true,
            error: Some(error),
            returned_files: FileRanges::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub metadata: RunMetadata,
    pub total_cases: usize,
    pub aggregate_stats: IndexMap<String, f64>,
    pub results: Vec<BenchmarkResult>,
}

/// Arithmetic-mean aggregation. `function_hit_rate` averages only over
/// cases that carry function-anchored ground truth so empty cases do not
/// dilute it.
pub fn aggregate_stats(results: &[BenchmarkResult]) -> IndexMap<String, f64> {
    let mut stats = IndexMap::new();
    let n = results.len();
    if n == 0 {
        stats.insert("success_rate".to_string(), 0.0);
        return stats;
    }
    let nf = n as f64;

    let mean = |f: &dyn Fn(&BenchmarkResult) -> f64| results.iter().map(f).sum::<f64>() / nf;

    stats.insert(
        "success_rate".into(),
        results.iter().filter(|r| r.success).count() as f64 / nf,
    );
    stats.insert(
        "avg_returned_files".into(),
        mean(&|r| r.returned_files_count as f64),
    );
    stats.insert(
        "avg_ground_truth_files".into(),
        mean(&|r| r.ground_truth_files_count as f64),
    );
    stats.insert("avg_file_recall".into(), mean(&|r| r.metrics.file_recall));
    stats.insert("avg_file_precision".into(), mean(&|r| r.metrics.file_precision));
    stats.insert(
        "avg_target_line_coverage".into(),
        mean(&|r| r.metrics.target_line_coverage),
    );
    stats.insert(
        "avg_target_line_precision_matched".into(),
        mean(&|r| r.metrics.target_line_precision_matched),
    );
    stats.insert(
        "avg_context_line_coverage".into(),
        mean(&|r| r.metrics.context_line_coverage),
    );
    stats.insert(
        "avg_context_line_precision_matched".into(),
        mean(&|r| r.metrics.context_line_precision_matched),
    );
    stats.insert(
        "avg_line_iou_matched".into(),
        mean(&|r| r.metrics.line_iou_matched),
    );
    stats.insert("avg_file_f_beta".into(), mean(&|r| r.metrics.file_f_beta));
    stats.insert("avg_line_f_beta".into(), mean(&|r| r.metrics.line_f_beta));
    stats.insert("avg_joint_f_beta".into(), mean(&|r| r.metrics.joint_f_beta));

    let function_results: Vec<&BenchmarkResult> = results
        .iter()
        .filter(|r| r.metrics.functions_total > 0)
        .collect();
    stats.insert("function_cases".into(), function_results.len() as f64);
    stats.insert(
        "avg_function_hit_rate".into(),
        if function_results.is_empty() {
            0.0
        } else {
            function_results
                .iter()
                .map(|r| r.metrics.function_hit_rate)
                .sum::<f64>()
                / function_results.len() as f64
        },
    );

    stats.insert("avg_turns".into(), mean(&|r| f64::from(r.turns_used)));
    stats.insert("avg_latency_ms".into(), mean(&|r| r.latency_ms));
    stats.insert("avg_repo_prep_ms".into(), mean(&|r| r.repo_prep_ms));

    stats
}

/// Paths and persistence for one run's artifacts.
pub struct ResultsStore {
    results_path: PathBuf,
    report_path: PathBuf,
}

impl ResultsStore {
    pub fn new(artifacts_root: &Path, run_id: &str) -> Self {
        Self {
            results_path: artifacts_root.join("results").join(format!("{run_id}.jsonl")),
            report_path: artifacts_root
                .join("reports")
                .join(format!("{run_id}.report.json")),
        }
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// Open the per-case JSONL writer; one line per completed case.
    pub fn open_results_writer(&self) -> Result<jsonl::LineWriter> {
        jsonl::LineWriter::create(&self.results_path)
    }

    /// Write the aggregate report exactly once, after the last case.
    pub fn write_report(&self, summary: &BenchmarkSummary) -> Result<()> {
        if let Some(parent) = self.report_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(summary).context("Failed to serialize report")?;
        std::fs::write(&self.report_path, json)
            .with_context(|| format!("Failed to write {}", self.report_path.display()))?;
        Ok(())
    }

    /// Load a previously written per-case results file.
    pub fn load_results(path: &Path) -> Result<Vec<BenchmarkResult>> {
        let (results, _dropped) = jsonl::read_records::<BenchmarkResult, _>(path)?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, recall: f64, functions_total: u32, hit_rate: f64) -> BenchmarkResult {
        BenchmarkResult {
            case_id: id.into(),
            repo: "o/n".into(),
            success: true,
            returned_files_count: 1,
            ground_truth_files_count: 1,
            metrics: CaseMetrics {
                file_recall: recall,
                functions_total,
                function_hit_rate: hit_rate,
                ..CaseMetrics::default()
            },
            turns_used: 4,
            latency_ms: 100.0,
            repo_prep_ms: 10.0,
            repo_cached: false,
            partial: false,
            error: None,
            returned_files: FileRanges::new(),
        }
    }

    #[test]
    fn function_hit_rate_averages_over_function_cases_only() {
        let results = vec![
            result("a", 1.0, 2, 0.5),
            result("b", 0.0, 0, 0.0), // no function GT; must not dilute
            result("c", 0.5, 1, 1.0),
        ];
        let stats = aggregate_stats(&results);
        assert_eq!(stats["function_cases"], 2.0);
        assert!((stats["avg_function_hit_rate"] - 0.75).abs() < 1e-9);
        assert!((stats["avg_file_recall"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_run_aggregates_to_zero() {
        let stats = aggregate_stats(&[]);
        assert_eq!(stats["success_rate"], 0.0);
    }

    #[test]
    fn result_jsonl_flattens_metrics() {
        let r = result("a", 0.75, 1, 1.0);
        let line = serde_json::to_string(&r).unwrap();
        // Metric fields sit at the top level of each record
        assert!(line.contains("\"file_recall\":0.75"));
        let back: BenchmarkResult = serde_json::from_str(&line).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn store_layout_follows_artifacts_scheme() {
        let store = ResultsStore::new(Path::new("/arts"), "run_x");
        assert_eq!(store.results_path(), Path::new("/arts/results/run_x.jsonl"));
        assert_eq!(
            store.report_path(),
            Path::new("/arts/reports/run_x.report.json")
        );
    }
}
