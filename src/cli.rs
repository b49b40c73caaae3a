use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
}

#[derive(Parser)]
#[command(name = "locbench")]
#[command(
    about = "Benchmark harness measuring how well LLM-driven agentic search localizes code changes"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress bars and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a processed dataset from raw issue/patch records
    Build(BuildArgs),

    /// Check a processed dataset against the schema invariants
    Validate(ValidateArgs),

    /// Run the benchmark over a processed dataset
    Run(RunArgs),

    /// Summarize a finished run from its report or results file
    Report(ReportArgs),

    /// Analyze per-turn agent traces from a run
    Trace(TraceArgs),

    /// Initialize a locbench.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser)]
pub struct BuildArgs {
    /// Raw records JSONL (id, query, repo, base_commit, patch, ...)
    pub input: PathBuf,

    /// Output path for the processed dataset
    /// (default: <artifacts>/data/processed/<input-stem>.jsonl)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Propose soft-context entries from the call graph
    #[arg(long)]
    pub soft_context: bool,

    /// Process at most N raw records
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Parser)]
pub struct ValidateArgs {
    /// Processed dataset JSONL
    pub dataset: PathBuf,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Processed dataset JSONL
    pub dataset: PathBuf,

    /// Run identifier (default: timestamp-derived)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Worker pool size (default: from config)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Turn cap per case (default: from config)
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Use the dual-channel (lexical + semantic) harness
    #[arg(long)]
    pub dual: bool,

    /// Run at most N cases
    #[arg(long)]
    pub limit: Option<usize>,

    /// Per-case status lines instead of a progress bar
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct ReportArgs {
    /// A <run-id>.report.json or <run-id>.jsonl results file
    pub path: PathBuf,
}

#[derive(Parser)]
pub struct TraceArgs {
    /// Directory of per-case trace JSONL files (traces/<run-id>/)
    pub traces_dir: PathBuf,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory for the config file
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,

    /// Write the completion file into this directory
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print to stdout instead of writing a file
    #[arg(long)]
    pub stdout: bool,
}
