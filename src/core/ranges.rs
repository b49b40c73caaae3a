//! Line-range algebra over 1-indexed inclusive ranges.
//!
//! Everything downstream (ground truth, metrics, harness output) speaks
//! `LineRange`. Ranges are kept sorted and disjoint per file; merging
//! coalesces touching neighbors so `[1,3]` and `[4,6]` become `[1,6]`.

use serde::{Deserialize, Serialize};

/// A 1-indexed, inclusive line range. Serializes as `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineRange(pub u32, pub u32);

impl LineRange {
    /// Construct a range, returning `None` for inverted or zero-based input.
    pub fn new(start: u32, end: u32) -> Option<Self> {
        if start >= 1 && end >= start {
            Some(Self(start, end))
        } else {
            None
        }
    }

    pub fn start(&self) -> u32 {
        self.0
    }

    pub fn end(&self) -> u32 {
        self.1
    }

    /// Number of lines covered (inclusive on both ends).
    pub fn len(&self) -> u64 {
        u64::from(self.1 - self.0) + 1
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.0 <= line && line <= self.1
    }

    pub fn contains(&self, other: &LineRange) -> bool {
        self.0 <= other.0 && other.1 <= self.1
    }

    /// Clamp into `[lo, hi]`; `None` when the clamped range is empty.
    pub fn clamp_to(&self, lo: u32, hi: u32) -> Option<Self> {
        let start = self.0.max(lo);
        let end = self.1.min(hi);
        LineRange::new(start, end)
    }
}

/// Merge ranges into a sorted, disjoint list. Touching ranges coalesce:
/// `next.start <= last.end + 1` extends the last merged range. Idempotent.
pub fn merge(ranges: &[LineRange]) -> Vec<LineRange> {
    if ranges.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<LineRange> = ranges.to_vec();
    sorted.sort();

    let mut merged: Vec<LineRange> = Vec::with_capacity(sorted.len());
    merged.push(sorted[0]);

    for r in &sorted[1..] {
        let touches = merged
            .last()
            .is_some_and(|last| r.0 <= last.1.saturating_add(1));
        if touches {
            if let Some(last) = merged.last_mut() {
                last.1 = last.1.max(r.1);
            }
        } else {
            merged.push(*r);
        }
    }

    merged
}

/// Validate untrusted `[start, end]` pairs, dropping anything inverted,
/// zero-based, or structurally wrong, then merge. This is the lenient
/// entry point for ranges that crossed a serialization boundary.
pub fn normalize(raw: &[Vec<i64>]) -> Vec<LineRange> {
    let valid: Vec<LineRange> = raw
        .iter()
        .filter_map(|pair| {
            if pair.len() != 2 {
                return None;
            }
            let (s, e) = (pair[0], pair[1]);
            if s < 1 || e < s || s > i64::from(u32::MAX) || e > i64::from(u32::MAX) {
                return None;
            }
            LineRange::new(s as u32, e as u32)
        })
        .collect();
    merge(&valid)
}

/// Total line count over a merged list.
pub fn total_len(ranges: &[LineRange]) -> u64 {
    ranges.iter().map(LineRange::len).sum()
}

/// Overlap length between two pre-merged lists via a two-pointer sweep.
/// Callers holding unmerged input must merge first; the metrics engine
/// re-merges at its boundary.
pub fn intersection_length(a: &[LineRange], b: &[LineRange]) -> u64 {
    let mut i = 0;
    let mut j = 0;
    let mut total: u64 = 0;

    while i < a.len() && j < b.len() {
        let start = a[i].0.max(b[j].0);
        let end = a[i].1.min(b[j].1);
        if start <= end {
            total += u64::from(end - start) + 1;
        }

        // Advance whichever range ends first
        if a[i].1 < b[j].1 {
            i += 1;
        } else {
            j += 1;
        }
    }

    total
}

/// Cluster distinct positive lines into ranges, starting a new range
/// whenever the next line exceeds `prev + 1 + gap`.
pub fn cluster(lines: &[u32], gap: u32) -> Vec<LineRange> {
    let mut sorted: Vec<u32> = lines.iter().copied().filter(|&l| l >= 1).collect();
    sorted.sort_unstable();
    sorted.dedup();

    if sorted.is_empty() {
        return Vec::new();
    }

    let mut ranges = Vec::new();
    let mut start = sorted[0];
    let mut prev = sorted[0];

    for &line in &sorted[1..] {
        if line <= prev + 1 + gap {
            prev = line;
            continue;
        }
        ranges.push(LineRange(start, prev));
        start = line;
        prev = line;
    }

    ranges.push(LineRange(start, prev));
    ranges
}
