//! Per-case trace emission.
//!
//! The runner opens one sink per case before invoking the harness; every
//! turn lands as one `TurnRecord` line, numbered here so turn ids stay
//! strictly monotonic even when several channels share a file. Writes
//! flush eagerly so a killed run keeps its completed turns.

use std::path::Path;

use anyhow::Result;

use crate::core::trace::{LlmResponseRecord, ToolResultRecord, TurnRecord};
use crate::infra::jsonl::LineWriter;

/// Everything a turn reports except its number.
#[derive(Debug, Clone, Default)]
pub struct TurnBody {
    pub tool_results: Vec<ToolResultRecord>,
    pub report_back: Option<serde_json::Value>,
    pub llm_latency_ms: f64,
    pub llm_response: Option<LlmResponseRecord>,
}

enum Sink {
    File(LineWriter),
    Memory(Vec<TurnRecord>),
    Null,
}

pub struct TraceWriter {
    sink: Sink,
    next_turn: u32,
}

impl TraceWriter {
    /// Write to `traces/<run-id>/<case-id>.jsonl` (any path the caller
    /// resolved).
    pub fn to_file(path: &Path) -> Result<Self> {
        Ok(Self {
            sink: Sink::File(LineWriter::create(path)?),
            next_turn: 1,
        })
    }

    /// Collect in memory; used by tests and the dual-harness internals.
    pub fn in_memory() -> Self {
        Self {
            sink: Sink::Memory(Vec::new()),
            next_turn: 1,
        }
    }

    /// Discard everything.
    pub fn disabled() -> Self {
        Self {
            sink: Sink::Null,
            next_turn: 1,
        }
    }

    /// Record one turn, assigning the next turn number. Returns the
    /// number assigned.
    pub fn record(&mut self, body: TurnBody) -> Result<u32> {
        let turn = self.next_turn;
        self.next_turn += 1;

        let record = TurnRecord {
            turn,
            tool_results: body.tool_results,
            report_back: body.report_back,
            llm_latency_ms: body.llm_latency_ms,
            llm_response: body.llm_response,
        };

        match &mut self.sink {
            Sink::File(writer) => writer.append_flush(&record)?,
            Sink::Memory(records) => records.push(record),
            Sink::Null => {}
        }

        Ok(turn)
    }

    /// Recorded turns, when collecting in memory.
    pub fn recorded(&self) -> &[TurnRecord] {
        match &self.sink {
            Sink::Memory(records) => records,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_numbers_are_strictly_monotonic() -> Result<()> {
        let mut writer = TraceWriter::in_memory();
        for _ in 0..3 {
            writer.record(TurnBody::default())?;
        }
        let turns: Vec<u32> = writer.recorded().iter().map(|t| t.turn).collect();
        assert_eq!(turns, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn file_sink_writes_one_line_per_turn() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("traces/run/case.jsonl");

        let mut writer = TraceWriter::to_file(&path)?;
        writer.record(TurnBody {
            tool_results: vec![ToolResultRecord {
                name: "glob".into(),
                result: "a.py".into(),
            }],
            ..TurnBody::default()
        })?;
        writer.record(TurnBody::default())?;
        drop(writer);

        let content = std::fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().next().unwrap().contains("\"turn\":1"));
        Ok(())
    }
}
