//! Shared newline-delimited JSON plumbing.
//!
//! Every on-disk artifact in this crate is either JSONL (datasets, results,
//! traces) or a single report JSON. Loading is lenient per the input-error
//! policy: a malformed line is dropped with a structured warning and the
//! load continues.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Read one record per line, dropping undecodable lines with a warning.
/// Returns the surviving records and the number of dropped lines.
pub fn read_records<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<(Vec<T>, usize)> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut dropped = 0usize;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(err) => {
                dropped += 1;
                warn!(
                    file = %path.display(),
                    line = lineno + 1,
                    %err,
                    "dropping malformed JSONL record"
                );
            }
        }
    }

    Ok((records, dropped))
}

/// Write one record per line, creating parent directories as needed.
pub fn write_records<T: Serialize, P: AsRef<Path>>(path: P, records: &[T]) -> Result<()> {
    let mut writer = LineWriter::create(path)?;
    for record in records {
        writer.append(record)?;
    }
    writer.finish()
}

/// Buffered append-style JSONL writer. Results and traces go through this
/// so each record lands as exactly one line.
pub struct LineWriter {
    inner: BufWriter<File>,
}

impl LineWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self { inner: BufWriter::new(file) })
    }

    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize record")?;
        self.inner
            .write_all(json.as_bytes())
            .context("Failed to write record")?;
        self.inner.write_all(b"\n").context("Failed to write newline")?;
        Ok(())
    }

    /// Flush eagerly so a crash mid-run loses at most the in-flight record.
    pub fn append_flush<T: Serialize>(&mut self, record: &T) -> Result<()> {
        self.append(record)?;
        self.inner.flush().context("Failed to flush record")
    }

    pub fn finish(mut self) -> Result<()> {
        self.inner.flush().context("Failed to flush output")
    }
}
