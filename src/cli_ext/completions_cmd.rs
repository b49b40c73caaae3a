//! `locbench completions`: shell completion scripts.
//!
//! The binary name comes from the command definition itself, so the
//! generated scripts stay correct if the binary is ever renamed.

use std::io;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, generate_to};

use crate::cli::{AppContext, Cli, CompletionsArgs};

pub fn run(args: CompletionsArgs, ctx: &AppContext) -> Result<()> {
    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    if let Some(dir) = args.out_dir.filter(|_| !args.stdout) {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = generate_to(args.shell, &mut cmd, &bin_name, &dir)
            .context("Failed to generate completion file")?;
        if !ctx.quiet {
            eprintln!("Wrote {} completion to {}", args.shell, path.display());
        }
        return Ok(());
    }

    generate(args.shell, &mut cmd, bin_name, &mut io::stdout());
    Ok(())
}
