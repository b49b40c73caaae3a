//! `locbench validate`: schema and invariant checks over a dataset.

use anyhow::{Result, bail};
use owo_colors::OwoColorize;

use crate::cli::{AppContext, ValidateArgs};
use crate::core::dataset::DatasetStore;

pub fn run(args: ValidateArgs, ctx: &AppContext) -> Result<()> {
    let cases = DatasetStore::load(&args.dataset)?;

    let mut valid = 0usize;
    let mut errors: Vec<(String, String)> = Vec::new();
    let mut total_entries = 0usize;
    let mut with_soft_context = 0usize;

    for case in &cases {
        total_entries += case.hard_gt.len();
        if !case.soft_context.is_empty() {
            with_soft_context += 1;
        }
        match case.check_invariants() {
            Ok(()) => valid += 1,
            Err(reason) => errors.push((case.id.clone(), reason)),
        }
    }

    if !ctx.quiet {
        println!("{} cases loaded from {}", cases.len(), args.dataset.display());
        println!("  ground-truth entries: {total_entries}");
        println!("  cases with soft context: {with_soft_context}");
        println!("  valid: {valid}");
    }

    if !errors.is_empty() {
        for (id, reason) in &errors {
            let label = if ctx.no_color {
                "invalid".to_string()
            } else {
                "invalid".red().to_string()
            };
            eprintln!("  {label} {id}: {reason}");
        }
        bail!("{} of {} cases failed validation", errors.len(), cases.len());
    }

    if !ctx.quiet {
        println!("✓ dataset is valid");
    }
    Ok(())
}
