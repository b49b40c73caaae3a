//! `locbench build`: raw issue/patch records to processed dataset.
//!
//! For each raw record: provision the repo at the base commit, extract
//! changed base lines from the patch, derive function-anchored ground
//! truth, optionally propose soft context from the call graph, and emit a
//! `DatasetCase`. Records that fail any stage are skipped with a counted
//! reason; the build never aborts on a single bad record.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::{AppContext, BuildArgs};
use crate::core::callgraph::propose_soft_context;
use crate::core::dataset::DatasetStore;
use crate::core::git::RepoProvisioner;
use crate::core::gtbuild::{GroundTruthBuilder, GroundTruthError};
use crate::core::schema::DatasetCase;
use crate::infra::config::load_config;
use crate::parsers::index::IndexerRegistry;

pub fn run(args: BuildArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config().unwrap_or_default();
    let artifacts = config.artifacts_root();

    let registry = IndexerRegistry::with_languages(&config.dataset.languages)?;
    let builder = GroundTruthBuilder::new(&registry, config.build_limits());
    let provisioner = RepoProvisioner::new(
        artifacts.join("repos"),
        config.dataset.remote_base.clone(),
    );

    let records = DatasetStore::load_raw(&args.input)?;
    let total = records.len();
    let limit = args.limit.unwrap_or(usize::MAX);

    let output = args.output.clone().unwrap_or_else(|| {
        let stem = args
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string());
        artifacts
            .join("data/processed")
            .join(format!("{stem}.jsonl"))
    });

    if !ctx.quiet {
        println!("Building dataset from {} ({total} raw records)", args.input.display());
    }

    let mut cases: Vec<DatasetCase> = Vec::new();
    let mut skips: BTreeMap<&'static str, usize> = BTreeMap::new();
    let skip = |reason: &'static str, skips: &mut BTreeMap<&'static str, usize>| {
        *skips.entry(reason).or_insert(0) += 1;
    };

    for record in records.into_iter().take(limit) {
        if let Err(reason) = record.validate() {
            warn!(id = %record.id, %reason, "dropping malformed raw record");
            skip("malformed_record", &mut skips);
            continue;
        }

        let repo_root = match provisioner.ensure(&record.repo, &record.base_commit) {
            Ok(path) => path,
            Err(err) => {
                warn!(id = %record.id, repo = %record.repo, %err, "provisioning failed");
                skip("provisioner_error", &mut skips);
                continue;
            }
        };

        let changed = record.changed_lines();
        if changed.is_empty() {
            skip("no_changed_lines", &mut skips);
            continue;
        }

        let hard_gt = match builder.build(&repo_root, &changed) {
            Ok(entries) => entries,
            Err(err) => {
                info!(id = %record.id, %err, "record rejected");
                skip(skip_reason(&err), &mut skips);
                continue;
            }
        };

        let soft_context = if args.soft_context && config.dataset.soft_context_depth > 0 {
            propose_soft_context(
                &repo_root,
                &hard_gt,
                &registry,
                config.dataset.soft_context_depth,
            )
        } else {
            Vec::new()
        };

        cases.push(DatasetCase {
            id: record.id,
            query: record.query.trim().to_string(),
            repo: record.repo,
            base_commit: record.base_commit,
            hard_gt,
            soft_context,
            solvability: None,
            issue_url: record.issue_url,
            pr_url: record.pr_url,
        });
    }

    DatasetStore::save(&output, &cases)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if !ctx.quiet {
        println!("✓ Wrote {} cases to {}", cases.len(), output.display());
        for (reason, count) in &skips {
            println!("  skipped {count}: {reason}");
        }
    }

    Ok(())
}

fn skip_reason(err: &GroundTruthError) -> &'static str {
    match err {
        GroundTruthError::NoEligiblePaths => "no_eligible_paths",
        GroundTruthError::NoValidFunctionGt => "no_valid_function_gt",
        GroundTruthError::TooManyBlocks { .. } => "too_many_blocks",
        GroundTruthError::SingleLineRatioExceeded { .. } => "single_line_ratio_exceeded",
    }
}
