//! `locbench trace`: behavioral report over a run's agent traces.

use anyhow::{Context, Result};

use crate::cli::{AppContext, TraceArgs};
use crate::core::trace::{analyze_batch, format_report};

pub fn run(args: TraceArgs, _ctx: &AppContext) -> Result<()> {
    let analyses = analyze_batch(&args.traces_dir)
        .with_context(|| format!("Failed to analyze {}", args.traces_dir.display()))?;
    println!("{}", format_report(&analyses));
    Ok(())
}
