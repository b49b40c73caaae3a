//! `locbench run`: execute the benchmark over a processed dataset.
//!
//! Wires the configured provider behind the harness contract: one client
//! for the run, a fresh harness per case bound to that case's repo root.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::cli::{AppContext, RunArgs};
use crate::core::dataset::DatasetStore;
use crate::core::git::RepoProvisioner;
use crate::core::metadata::{ProviderInfo, new_run_id, sanitize_endpoint_url};
use crate::core::metrics::MetricsConfig;
use crate::core::runner::{BenchmarkRunner, HarnessFactory, RunContext, RunnerOptions};
use crate::harness::agentic::HarnessSettings;
use crate::harness::{
    AgenticSearchHarness, DualChannelHarness, OpenAiCompatClient, SearchBounds, SearchHarness,
    ToolChannel, ToolExecutor,
};
use crate::infra::config::load_config;
use crate::parsers::index::IndexerRegistry;

/// Builds single- or dual-channel harnesses. A fresh client is
/// constructed per case so no connection or auth state straddles cases.
struct ProviderHarnessFactory {
    endpoint: String,
    api_key: Option<String>,
    turn_timeout: Duration,
    registry: Arc<IndexerRegistry>,
    settings: HarnessSettings,
    dual_channel: bool,
}

impl ProviderHarnessFactory {
    fn new_client(&self) -> Arc<dyn crate::harness::LlmClient> {
        Arc::new(OpenAiCompatClient::new(
            &self.endpoint,
            self.api_key.clone(),
            Some(self.turn_timeout),
        ))
    }
}

impl HarnessFactory for ProviderHarnessFactory {
    fn create(&self, repo_root: &Path) -> Result<Box<dyn SearchHarness + '_>> {
        if self.dual_channel {
            Ok(Box::new(DualChannelHarness::new(
                self.new_client(),
                repo_root,
                self.registry.clone(),
                self.settings.clone(),
            )))
        } else {
            let executor =
                ToolExecutor::new(repo_root, self.registry.clone(), ToolChannel::Full)?;
            Ok(Box::new(AgenticSearchHarness::new(
                self.new_client(),
                executor,
                self.settings.clone(),
            )))
        }
    }
}

pub fn run(args: RunArgs, ctx: &AppContext) -> Result<()> {
    let mut config = load_config().unwrap_or_default();
    if let Some(workers) = args.workers {
        config.runner.workers = workers;
    }
    if let Some(max_turns) = args.max_turns {
        config.search.max_turns = max_turns;
    }
    if args.dual {
        config.search.dual_channel = true;
    }

    let mut cases = DatasetStore::load(&args.dataset)
        .with_context(|| format!("Failed to load dataset {}", args.dataset.display()))?;
    if let Some(limit) = args.limit {
        cases.truncate(limit);
    }
    if cases.is_empty() {
        anyhow::bail!("dataset {} contains no cases", args.dataset.display());
    }

    let artifacts = config.artifacts_root();
    let run_id = args.run_id.clone().unwrap_or_else(|| new_run_id(Utc::now()));

    let api_key = std::env::var(&config.provider.api_key_env).ok();
    if api_key.is_none() && !ctx.quiet {
        eprintln!(
            "warning: {} is not set; provider calls will be unauthenticated",
            config.provider.api_key_env
        );
    }
    let registry = Arc::new(IndexerRegistry::with_languages(&config.dataset.languages)?);
    let settings = HarnessSettings {
        model: config.provider.model.clone(),
        temperature: config.provider.temperature,
        bounds: SearchBounds {
            max_turns: config.search.max_turns,
            total_timeout: Some(Duration::from_secs(config.search.total_timeout_s)),
            turn_timeout: Some(Duration::from_secs(config.search.turn_timeout_s)),
        },
        history_limit: config.search.history_limit,
    };

    let factory = ProviderHarnessFactory {
        endpoint: config.provider.endpoint.clone(),
        api_key,
        turn_timeout: Duration::from_secs(config.search.turn_timeout_s),
        registry,
        settings,
        dual_channel: config.search.dual_channel,
    };
    let provisioner = RepoProvisioner::new(
        artifacts.join("repos"),
        config.dataset.remote_base.clone(),
    );

    let run_ctx = RunContext {
        run_id: run_id.clone(),
        artifacts_root: artifacts.clone(),
        dataset_path: args.dataset.clone(),
        provider: ProviderInfo {
            name: config.provider.name.clone(),
            model: config.provider.model.clone(),
            endpoint: Some(sanitize_endpoint_url(&config.provider.endpoint)),
            max_turns: config.search.max_turns,
            temperature: config.provider.temperature,
        },
    };

    if !ctx.quiet {
        println!(
            "Running {} cases with {} workers ({} harness)",
            cases.len(),
            config.runner.workers,
            if config.search.dual_channel { "dual-channel" } else { "single-channel" }
        );
    }

    let runner = BenchmarkRunner::new(
        &provisioner,
        &factory,
        RunnerOptions {
            workers: config.runner.workers,
            metrics: MetricsConfig {
                beta: config.runner.beta,
                file_weight: config.runner.file_weight,
            },
            show_progress: !ctx.quiet,
            verbose: args.verbose,
        },
    );

    let summary = runner.run(&cases, &run_ctx)?;

    if !ctx.quiet {
        println!();
        println!("run:      {run_id}");
        println!("results:  {}", artifacts.join("results").join(format!("{run_id}.jsonl")).display());
        println!("report:   {}", artifacts.join("reports").join(format!("{run_id}.report.json")).display());
        println!("traces:   {}", artifacts.join("traces").join(&run_id).display());
        println!();
        super::report_cmd::print_stats(&summary.aggregate_stats, summary.total_cases);
    }

    Ok(())
}
