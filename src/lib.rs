//! **locbench** - Benchmark harness for LLM-driven agentic code localization
//!
//! Builds function-anchored ground truth from issue/patch records with
//! tree-sitter, runs a bounded multi-turn agent loop against checked-out
//! repositories, scores returned line ranges at file/line/function level,
//! and analyzes per-turn behavioral traces.

/// Command-line interface with clap integration
pub mod cli;

/// Core pipeline - ground truth, provisioning, scoring, analysis
pub mod core {
    /// Line-range algebra (merge, intersect, cluster)
    pub mod ranges;
    pub use ranges::LineRange;

    /// Path canonicalization for ground-truth comparison
    pub mod paths;

    /// Canonical dataset records (DatasetCase and friends)
    pub mod schema;
    pub use schema::{ContextEntry, DatasetCase, GroundTruthEntry, SolvabilityInfo};

    /// Unified-diff scanning into changed base lines
    pub mod patch;

    /// Function-anchored ground-truth derivation
    pub mod gtbuild;
    pub use gtbuild::{GroundTruthBuilder, GroundTruthError};

    /// Same-file call graphs for soft-context proposals
    pub mod callgraph;

    /// Dataset loading, saving, and raw-record ingestion
    pub mod dataset;
    pub use dataset::{DatasetStore, RawRecord};

    /// Repository provisioning (clone, fetch, detached checkout)
    pub mod git;
    pub use git::RepoProvisioner;

    /// Localization scoring at file, line, and function level
    pub mod metrics;
    pub use metrics::{CaseMetrics, MetricsConfig};

    /// Per-case results and run summaries
    pub mod results;
    pub use results::{BenchmarkResult, BenchmarkSummary, ResultsStore};

    /// Reproducibility metadata envelope
    pub mod metadata;
    pub use metadata::RunMetadata;

    /// Per-case orchestration over a bounded worker pool
    pub mod runner;
    pub use runner::{BenchmarkRunner, HarnessFactory, RunContext, RunnerOptions};

    /// Agent-behavior analysis over per-turn traces
    pub mod trace;
    pub use trace::{TraceAnalysis, TurnRecord};
}

/// The agentic search harness - LLM loop, tools, channels
pub mod harness;

/// Language processing - AST definition indexing with tree-sitter
pub mod parsers {
    /// Language-agnostic definition index and registry
    pub mod index;
    pub use index::{AstIndex, DefKind, Definition, DefinitionIndexer, IndexerRegistry};

    /// Python definition indexer
    pub mod python_ast;
    pub use python_ast::PythonIndexer;

    /// Rust definition indexer
    pub mod rust_ast;
    pub use rust_ast::RustIndexer;
}

/// Infrastructure - configuration, I/O, walking, JSONL plumbing
pub mod infra {
    /// Configuration management with TOML support
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Memory-mapped file I/O for large files (>1MB threshold)
    pub mod io;
    pub use io::{FileContent, read_file_smart};

    /// CRLF/LF-robust line indexing for O(1) line→byte mapping
    pub mod line_index;
    pub use line_index::NewlineIndex;

    /// Gitignore-aware repository walking
    pub mod walk;
    pub use walk::RepoWalker;

    /// Newline-delimited JSON reading and writing
    pub mod jsonl;
}

/// Command implementations behind the CLI surface
pub mod cli_ext {
    pub mod build_cmd;
    pub mod completions_cmd;
    pub mod report_cmd;
    pub mod run_cmd;
    pub mod trace_cmd;
    pub mod validate_cmd;
}

// Strategic re-exports for library consumers
pub use cli::{AppContext, Cli, Commands};
pub use self::core::{
    BenchmarkResult, BenchmarkRunner, BenchmarkSummary, DatasetCase, DatasetStore,
    GroundTruthEntry, LineRange, RepoProvisioner,
};
pub use harness::{AgenticSearchHarness, DualChannelHarness, LlmClient, SearchHarness};
pub use infra::{Config, load_config};
pub use parsers::{IndexerRegistry, PythonIndexer, RustIndexer};
