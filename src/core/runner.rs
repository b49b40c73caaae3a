//! Per-case orchestration: provision → search → score → persist.
//!
//! Cases run on a bounded rayon pool; results append to the run's JSONL
//! in completion order and the aggregate report is written exactly once
//! after the last case. A case failure of any kind (provisioner, harness,
//! panic) produces a zero-scored partial result and the run continues.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing::{info, warn};

use crate::core::git::RepoProvisioner;
use crate::core::metadata::{
    CaseRef, DatasetInfo, ProviderInfo, RunMetadata, harness_commit, sha256_file,
};
use crate::core::metrics::{MetricsConfig, compute_case_metrics};
use crate::core::paths;
use crate::core::results::{BenchmarkResult, BenchmarkSummary, ResultsStore, aggregate_stats};
use crate::core::schema::DatasetCase;
use crate::harness::{SearchHarness, TraceWriter};

/// Builds a harness bound to one case's repository. A fresh harness per
/// case keeps client and tool state from straddling cases.
pub trait HarnessFactory: Sync {
    fn create(&self, repo_root: &Path) -> Result<Box<dyn SearchHarness + '_>>;
}

/// Identity and layout of one run.
pub struct RunContext {
    pub run_id: String,
    pub artifacts_root: PathBuf,
    pub dataset_path: PathBuf,
    pub provider: ProviderInfo,
}

pub struct RunnerOptions {
    pub workers: usize,
    pub metrics: MetricsConfig,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            metrics: MetricsConfig::default(),
            show_progress: true,
            verbose: false,
        }
    }
}

pub struct BenchmarkRunner<'a> {
    provisioner: &'a RepoProvisioner,
    factory: &'a dyn HarnessFactory,
    options: RunnerOptions,
}

impl<'a> BenchmarkRunner<'a> {
    pub fn new(
        provisioner: &'a RepoProvisioner,
        factory: &'a dyn HarnessFactory,
        options: RunnerOptions,
    ) -> Self {
        Self {
            provisioner,
            factory,
            options,
        }
    }

    pub fn run(&self, cases: &[DatasetCase], ctx: &RunContext) -> Result<BenchmarkSummary> {
        let started_at = Utc::now();
        let wall_start = Instant::now();

        let store = ResultsStore::new(&ctx.artifacts_root, &ctx.run_id);
        let writer = Mutex::new(store.open_results_writer()?);
        let results: Mutex<Vec<BenchmarkResult>> = Mutex::new(Vec::with_capacity(cases.len()));
        let traces_dir = ctx.artifacts_root.join("traces").join(&ctx.run_id);

        let bar = if self.options.show_progress && !self.options.verbose {
            let bar = ProgressBar::new(cases.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            Some(bar)
        } else {
            None
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .context("Failed to build worker pool")?;

        pool.install(|| {
            rayon::scope(|scope| {
                for case in cases {
                    let writer = &writer;
                    let results = &results;
                    let traces_dir = &traces_dir;
                    let bar = &bar;
                    scope.spawn(move |_| {
                        if let Some(bar) = bar {
                            bar.set_message(case.id.clone());
                        }

                        let result = self.run_case_guarded(case, traces_dir);

                        if self.options.verbose {
                            let icon = if result.success {
                                "✓".green().to_string()
                            } else {
                                "✗".red().to_string()
                            };
                            eprintln!(
                                "  {icon} {} recall={:.0}% prep={:.1}s search={:.1}s",
                                result.case_id,
                                result.metrics.file_recall * 100.0,
                                result.repo_prep_ms / 1000.0,
                                result.latency_ms / 1000.0,
                            );
                        }

                        // Append in completion order; persistence is
                        // best-effort, the in-memory result survives
                        {
                            let mut writer = writer.lock().unwrap_or_else(|p| p.into_inner());
                            if let Err(err) = writer.append_flush(&result) {
                                warn!(case = %result.case_id, %err, "failed to persist result");
                            }
                        }
                        results.lock().unwrap_or_else(|p| p.into_inner()).push(result);

                        if let Some(bar) = bar {
                            bar.inc(1);
                        }
                    });
                }
            });
        });

        if let Some(bar) = &bar {
            bar.finish_with_message("done");
        }

        let completed_at = Utc::now();
        let duration_s = wall_start.elapsed().as_secs_f64();
        let results = results.into_inner().unwrap_or_else(|p| p.into_inner());

        let metadata = RunMetadata {
            run_id: ctx.run_id.clone(),
            dataset: DatasetInfo {
                dataset_path: ctx.dataset_path.display().to_string(),
                dataset_sha256: sha256_file(&ctx.dataset_path).ok(),
                cases: cases
                    .iter()
                    .map(|c| CaseRef {
                        id: c.id.clone(),
                        repo: c.repo.clone(),
                        base_commit: c.base_commit.clone(),
                    })
                    .collect(),
            },
            provider: ctx.provider.clone(),
            harness_commit: harness_commit(),
            started_at_utc: started_at,
            completed_at_utc: completed_at,
            duration_s,
        };

        let summary = BenchmarkSummary {
            metadata,
            total_cases: results.len(),
            aggregate_stats: aggregate_stats(&results),
            results,
        };

        store.write_report(&summary)?;
        info!(
            run_id = %ctx.run_id,
            cases = summary.total_cases,
            duration_s,
            "run complete"
        );

        Ok(summary)
    }

    /// A panicking case must not take down the run.
    fn run_case_guarded(&self, case: &DatasetCase, traces_dir: &Path) -> BenchmarkResult {
        catch_unwind(AssertUnwindSafe(|| self.run_case(case, traces_dir))).unwrap_or_else(|_| {
            warn!(case = %case.id, "case panicked");
            BenchmarkResult::failed(
                &case.id,
                &case.repo,
                case.hard_gt.len() as u32,
                "panic: case execution aborted".to_string(),
            )
        })
    }

    fn run_case(&self, case: &DatasetCase, traces_dir: &Path) -> BenchmarkResult {
        let functions_total = case.hard_gt.len() as u32;
        let gt_target = case.target_ground_truth();
        let gt_files_count = gt_target.len();

        let expected_dir = self.provisioner.clone_dir(&case.repo);
        let repo_cached = expected_dir.exists();

        let prep_start = Instant::now();
        let repo_root = match self.provisioner.ensure(&case.repo, &case.base_commit) {
            Ok(path) => path,
            Err(err) => {
                let mut result = BenchmarkResult::failed(
                    &case.id,
                    &case.repo,
                    functions_total,
                    format!("provisioner_error: {err:#}"),
                );
                result.ground_truth_files_count = gt_files_count;
                result.repo_cached = repo_cached;
                result.repo_prep_ms = prep_start.elapsed().as_secs_f64() * 1000.0;
                return result;
            }
        };
        let repo_prep_ms = prep_start.elapsed().as_secs_f64() * 1000.0;

        let trace_path = traces_dir.join(format!("{}.jsonl", case.id));
        let mut trace = match TraceWriter::to_file(&trace_path) {
            Ok(writer) => writer,
            Err(err) => {
                let mut result = BenchmarkResult::failed(
                    &case.id,
                    &case.repo,
                    functions_total,
                    format!("trace_error: {err:#}"),
                );
                result.ground_truth_files_count = gt_files_count;
                result.repo_cached = repo_cached;
                result.repo_prep_ms = repo_prep_ms;
                return result;
            }
        };

        let search_start = Instant::now();
        let outcome = self
            .factory
            .create(&repo_root)
            .and_then(|harness| harness.run(&case.query, &mut trace));
        let latency_ms = search_start.elapsed().as_secs_f64() * 1000.0;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut result = BenchmarkResult::failed(
                    &case.id,
                    &case.repo,
                    functions_total,
                    format!("harness_error: {err:#}"),
                );
                result.ground_truth_files_count = gt_files_count;
                result.repo_cached = repo_cached;
                result.repo_prep_ms = repo_prep_ms;
                result.latency_ms = latency_ms;
                return result;
            }
        };

        // Whatever was collected is still scored, partial or not
        let returned = paths::normalize_returned(&outcome.files, Some(&repo_root));
        let gt_context = case.context_ground_truth();
        let metrics = compute_case_metrics(
            &returned,
            &gt_target,
            &gt_context,
            &case.function_targets(),
            Some(&repo_root),
            &self.options.metrics,
        );

        let success = !outcome.partial && outcome.error.is_none();

        BenchmarkResult {
            case_id: case.id.clone(),
            repo: case.repo.clone(),
            success,
            returned_files_count: outcome.files.len(),
            ground_truth_files_count: gt_files_count,
            metrics,
            turns_used: outcome.turns_used,
            latency_ms,
            repo_prep_ms,
            repo_cached,
            partial: outcome.partial,
            error: outcome.error,
            returned_files: returned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ranges::LineRange;
    use crate::core::schema::GroundTruthEntry;
    use crate::harness::{RawReturnedFiles, SearchOutcome};
    use std::process::Command;

    /// Harness that always returns the same files.
    struct FixedHarness {
        files: RawReturnedFiles,
        partial: bool,
    }

    impl SearchHarness for FixedHarness {
        fn run(&self, _query: &str, trace: &mut TraceWriter) -> Result<SearchOutcome> {
            trace.record(crate::harness::TurnBody::default())?;
            Ok(SearchOutcome {
                files: self.files.clone(),
                turns_used: 1,
                partial: self.partial,
                explanation: None,
                error: None,
            })
        }
    }

    struct FixedFactory {
        files: RawReturnedFiles,
    }

    impl HarnessFactory for FixedFactory {
        fn create(&self, _repo_root: &Path) -> Result<Box<dyn SearchHarness + '_>> {
            Ok(Box::new(FixedHarness {
                files: self.files.clone(),
                partial: false,
            }))
        }
    }

    fn make_origin(tmp: &Path) -> (String, String) {
        let work = tmp.join("work");
        std::fs::create_dir_all(&work).unwrap();
        let git = |dir: &Path, args: &[&str]| {
            let out = Command::new("git").arg("-C").arg(dir).args(args).output().unwrap();
            assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
            String::from_utf8_lossy(&out.stdout).into_owned()
        };
        git(&work, &["init", "-b", "main"]);
        git(&work, &["config", "user.email", "bench@example.com"]);
        git(&work, &["config", "user.name", "bench"]);
        std::fs::write(work.join("lib.py"), "def f():\n    return 1\n").unwrap();
        git(&work, &["add", "."]);
        git(&work, &["commit", "-m", "initial"]);
        let sha = git(&work, &["rev-parse", "HEAD"]).trim().to_string();

        let bare = tmp.join("remote/owner/name.git");
        std::fs::create_dir_all(&bare).unwrap();
        git(&bare, &["init", "--bare", "-b", "main"]);
        git(&work, &["push", &bare.to_string_lossy(), "main"]);
        (format!("file://{}/", tmp.join("remote").display()), sha)
    }

    fn case(sha: &str) -> DatasetCase {
        DatasetCase {
            id: "case-1".into(),
            query: "where is f".into(),
            repo: "owner/name".into(),
            base_commit: sha.into(),
            hard_gt: vec![GroundTruthEntry {
                path: "lib.py".into(),
                function: "f".into(),
                class_name: None,
                range: LineRange(1, 2),
                target_ranges: vec![LineRange(2, 2)],
                signature: "def f()".into(),
            }],
            soft_context: Vec::new(),
            solvability: None,
            issue_url: None,
            pr_url: None,
        }
    }

    fn run_context(artifacts_root: &Path, dataset_path: &Path) -> RunContext {
        RunContext {
            run_id: "run_test".into(),
            artifacts_root: artifacts_root.to_path_buf(),
            dataset_path: dataset_path.to_path_buf(),
            provider: ProviderInfo {
                name: "mock".into(),
                model: "scripted".into(),
                endpoint: None,
                max_turns: 4,
                temperature: 0.0,
            },
        }
    }

    #[test]
    fn end_to_end_run_scores_and_persists() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let (remote_base, sha) = make_origin(tmp.path());
        let artifacts = tmp.path().join("artifacts");

        let dataset_path = tmp.path().join("cases.jsonl");
        crate::core::dataset::DatasetStore::save(&dataset_path, &[case(&sha)])?;

        let provisioner = RepoProvisioner::new(artifacts.join("repos"), remote_base);

        let mut files = RawReturnedFiles::new();
        files.insert("lib.py".into(), vec![vec![1, 2]]);
        let factory = FixedFactory { files };

        let runner = BenchmarkRunner::new(
            &provisioner,
            &factory,
            RunnerOptions {
                workers: 2,
                show_progress: false,
                ..RunnerOptions::default()
            },
        );

        let ctx = run_context(&artifacts, &dataset_path);
        let summary = runner.run(&[case(&sha)], &ctx)?;

        assert_eq!(summary.total_cases, 1);
        let result = &summary.results[0];
        assert!(result.success);
        assert_eq!(result.metrics.file_recall, 1.0);
        assert_eq!(result.metrics.functions_hit, 1);

        // Artifacts landed where the layout says
        assert!(artifacts.join("results/run_test.jsonl").exists());
        assert!(artifacts.join("reports/run_test.report.json").exists());
        assert!(artifacts.join("traces/run_test/case-1.jsonl").exists());

        assert!(summary.metadata.dataset.dataset_sha256.is_some());
        assert_eq!(summary.metadata.dataset.cases.len(), 1);
        Ok(())
    }

    #[test]
    fn provisioner_failure_yields_partial_zero_result() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let artifacts = tmp.path().join("artifacts");
        let dataset_path = tmp.path().join("cases.jsonl");
        std::fs::write(&dataset_path, "")?;

        // Remote base pointing nowhere
        let provisioner = RepoProvisioner::new(
            artifacts.join("repos"),
            format!("file://{}/missing/", tmp.path().display()),
        );
        let factory = FixedFactory {
            files: RawReturnedFiles::new(),
        };

        let runner = BenchmarkRunner::new(
            &provisioner,
            &factory,
            RunnerOptions {
                workers: 1,
                show_progress: false,
                ..RunnerOptions::default()
            },
        );

        let ctx = run_context(&artifacts, &dataset_path);
        let summary = runner.run(&[case("deadbeef")], &ctx)?;

        let result = &summary.results[0];
        assert!(!result.success);
        assert!(result.partial);
        assert!(
            result
                .error
                .as_deref()
                .unwrap_or("")
                .starts_with("provisioner_error:")
        );
        assert_eq!(result.metrics.file_recall, 0.0);
        assert_eq!(result.metrics.functions_total, 1);
        Ok(())
    }
}
