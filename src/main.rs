use anyhow::Result;
use clap::Parser;
use locbench::cli::{AppContext, Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // LOCBENCH_LOG=debug for verbose pipeline logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOCBENCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,

        no_color: cli.no_color,
    };

    match cli.command {
        Commands::Build(args) => locbench::cli_ext::build_cmd::run(args, &ctx),

        Commands::Validate(args) => locbench::cli_ext::validate_cmd::run(args, &ctx),

        Commands::Run(args) => locbench::cli_ext::run_cmd::run(args, &ctx),

        Commands::Report(args) => locbench::cli_ext::report_cmd::run(args, &ctx),

        Commands::Trace(args) => locbench::cli_ext::trace_cmd::run(args, &ctx),

        Commands::Init(args) => locbench::infra::config::init(args, &ctx),

        Commands::Completions(args) => locbench::cli_ext::completions_cmd::run(args, &ctx),
    }
}
