//! Filepath: src/infra/line_index.rs
//! Newline index with LF/CRLF-robust line/byte mapping.
//!
//! Goals
//! - Single pass over bytes to record '\n' positions.
//! - 1-based external line numbers (matching dataset and metric space).
//! - O(1) line→byte start/end via the index.
//! - End byte excludes trailing '\r' for CRLF lines.
//!
//! Notes
//! - An empty buffer has 0 lines.
//! - A non-empty buffer without '\n' has 1 line.
//! - For ranges, end is exclusive (Rust slicing convention).
use std::cmp;

use memchr::memchr_iter;

use crate::core::ranges::LineRange;

#[derive(Debug, Clone)]
pub struct NewlineIndex
{
    /// Total length of the buffer in bytes.
    len: usize,

    /// Positions of '\n' characters in the buffer.
    nl_positions: Vec<usize>,
}

impl NewlineIndex
{
    /// Build an index recording positions of '\n'.
    #[must_use]
    pub fn build(bytes: &[u8]) -> Self
    {
        // Pre-allocate space for newline positions (heuristic: 1 NL per 48 bytes)
        let mut nl_positions = Vec::with_capacity(bytes.len() / 48);

        // Find all '\n' positions using memchr for efficiency
        nl_positions.extend(memchr_iter(b'\n', bytes));

        // Construct the NewlineIndex with collected positions and buffer length
        Self { nl_positions, len: bytes.len() }
    }

    /// Total number of logical lines.
    /// Empty => 0. Non-empty => (# of '\n') + 1.
    /// Note: A trailing '\n' yields an additional empty last line.
    #[must_use]
    pub fn line_count(&self) -> usize
    {
        if self.len == 0
        {
            0
        }
        else
        {
            self.nl_positions
                .len()
                + 1
        }
    }

    /// Start byte of a 1-based line, or None when out of bounds.
    #[must_use]
    pub fn start_byte_of_line(
        &self,
        line1: usize,
    ) -> Option<usize>
    {
        let total = self.line_count();

        if line1 == 0 || line1 > total
        {
            return None;
        }

        // The first line always starts at byte 0
        if line1 == 1
        {
            return Some(0);
        }

        // For other lines, start is just after the previous '\n'
        self.nl_positions
            .get(line1 - 2)
            .map(|&prev_nl| prev_nl + 1)
    }

    /// End byte (exclusive) of a 1-based line.
    /// For CRLF, excludes trailing '\r' before '\n'.
    #[must_use]
    pub fn end_byte_of_line(
        &self,
        line1: usize,
        bytes: &[u8],
    ) -> Option<usize>
    {
        debug_assert_eq!(
            bytes.len(),
            self.len,
            "bytes length must match indexed buffer length"
        );

        let total = self.line_count();

        if line1 == 0 || line1 > total
        {
            return None;
        }

        // If the line is not the last line, find the position of the corresponding '\n'
        if line1
            <= self
                .nl_positions
                .len()
        {
            let nl = self.nl_positions[line1 - 1];

            // For CRLF, exclude trailing '\r' before '\n'
            if nl > 0 && bytes.get(nl - 1) == Some(&b'\r')
            {
                return Some(nl - 1);
            }

            return Some(nl);
        }

        // Last line without trailing '\n' ends at EOF.
        Some(self.len)
    }

    /// Byte range (start..end) for a 1-based inclusive line span, with the
    /// end line clamped to the available lines.
    #[must_use]
    pub fn byte_range_for_lines(
        &self,
        start_line1: usize,
        end_line1: usize,
        bytes: &[u8],
    ) -> Option<(usize, usize)>
    {
        debug_assert_eq!(
            bytes.len(),
            self.len,
            "bytes length must match indexed buffer length"
        );

        if start_line1 == 0 || end_line1 == 0 || start_line1 > end_line1
        {
            return None;
        }

        let total = self.line_count();

        if total == 0 || start_line1 > total
        {
            return None;
        }

        let s = self.start_byte_of_line(start_line1)?;

        let e = self.end_byte_of_line(cmp::min(end_line1, total), bytes)?;

        if s <= e && e <= self.len
        {
            Some((s, e))
        }
        else
        {
            None
        }
    }

    /// Byte range for a `LineRange`, clamped to the buffer.
    #[must_use]
    pub fn byte_range(
        &self,
        range: LineRange,
        bytes: &[u8],
    ) -> Option<(usize, usize)>
    {
        self.byte_range_for_lines(range.start() as usize, range.end() as usize, bytes)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn empty_buffer_has_zero_lines()
    {
        let idx = NewlineIndex::build(b"");
        assert_eq!(idx.line_count(), 0);
        assert_eq!(idx.byte_range(LineRange(1, 1), b""), None);
    }

    #[test]
    fn counts_lines_with_and_without_trailing_newline()
    {
        assert_eq!(NewlineIndex::build(b"a\nb\nc").line_count(), 3);
        assert_eq!(NewlineIndex::build(b"a\nb\nc\n").line_count(), 4);
        assert_eq!(NewlineIndex::build(b"solo").line_count(), 1);
    }

    #[test]
    fn byte_range_excludes_crlf_carriage_return()
    {
        let bytes = b"one\r\ntwo\r\nthree";
        let idx = NewlineIndex::build(bytes);

        let (s, e) = idx
            .byte_range(LineRange(2, 2), bytes)
            .expect("range");
        assert_eq!(&bytes[s..e], b"two");
    }

    #[test]
    fn byte_range_clamps_end_to_last_line()
    {
        let bytes = b"a\nb\nc";
        let idx = NewlineIndex::build(bytes);

        let (s, e) = idx
            .byte_range(LineRange(2, 99), bytes)
            .expect("range");
        assert_eq!(&bytes[s..e], b"b\nc");
    }

    #[test]
    fn byte_range_rejects_start_past_eof()
    {
        let bytes = b"a\nb";
        let idx = NewlineIndex::build(bytes);
        assert_eq!(idx.byte_range(LineRange(3, 4), bytes), None);
    }
}
