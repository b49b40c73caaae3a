//! The agentic search harness.
//!
//! A harness takes a natural-language query and a checked-out repository
//! and returns `{path → line ranges}` after a bounded multi-turn LLM ↔
//! tool loop. The runner only sees the [`SearchHarness`] contract; the
//! single-channel loop, the dual-channel variant, and the transport
//! behind them are interchangeable.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;

pub mod agentic;
pub mod client;
pub mod dual;
pub mod history;
pub mod message;
pub mod tools;
pub mod trace_sink;

pub use agentic::AgenticSearchHarness;
pub use client::{LlmClient, OpenAiCompatClient};
pub use dual::{ChannelEvidence, DualChannelHarness};
pub use tools::{ToolChannel, ToolExecutor};
pub use trace_sink::{TraceWriter, TurnBody};

/// Returned files exactly as the agent reported them: unvalidated
/// `[start, end]` pairs. The runner normalizes and filters degenerate
/// ranges before scoring.
pub type RawReturnedFiles = BTreeMap<String, Vec<Vec<i64>>>;

/// Iteration and time bounds for one harness invocation.
#[derive(Debug, Clone)]
pub struct SearchBounds {
    /// Hard cap on agent turns.
    pub max_turns: u32,

    /// Best-effort wall-clock budget for the whole run; checked between
    /// turns.
    pub total_timeout: Option<Duration>,

    /// Best-effort budget per LLM call, enforced by the transport.
    pub turn_timeout: Option<Duration>,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            max_turns: 12,
            total_timeout: Some(Duration::from_secs(600)),
            turn_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// What one harness invocation produced.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub files: RawReturnedFiles,
    pub turns_used: u32,

    /// True when bounds were exceeded or a component failed before a
    /// final report.
    pub partial: bool,

    pub explanation: Option<String>,
    pub error: Option<String>,
}

/// The contract the runner consumes. Controlled failures surface inside
/// the outcome (`partial` / `error`); `Err` is reserved for
/// infrastructure faults such as an unwritable trace file.
pub trait SearchHarness {
    fn run(&self, query: &str, trace: &mut TraceWriter) -> Result<SearchOutcome>;
}
