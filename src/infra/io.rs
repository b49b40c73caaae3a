//! File reading with a memory-map fast path for large sources.
//!
//! Repository files flow through here for ground-truth extraction and for
//! the harness `view_file` tool. Large files are mapped instead of copied;
//! non-UTF-8 content is decoded lossily rather than rejected, since
//! checked-out repos routinely contain stray encodings.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

use crate::core::ranges::LineRange;
use crate::infra::line_index::NewlineIndex;

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

pub enum FileContent {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl FileContent {
    pub fn bytes(&self) -> &[u8] {
        match self {
            FileContent::Mapped(mmap) => mmap,
            FileContent::Buffered(buf) => buf,
        }
    }

    /// Decode as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.bytes())
    }
}

pub fn read_file_smart<P: AsRef<Path>>(path: P) -> Result<FileContent> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;

    if metadata.len() > MMAP_THRESHOLD {
        // Use memory mapping for large files
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;

        // Safety: We're only reading the file, not modifying it
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to memory-map {}", path.display()))?;

        Ok(FileContent::Mapped(mmap))
    } else {
        // Read small files into memory
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read file {}", path.display()))?;

        Ok(FileContent::Buffered(content))
    }
}

/// Count the logical lines of a file without holding its text.
pub fn count_lines<P: AsRef<Path>>(path: P) -> Result<usize> {
    let content = read_file_smart(path)?;
    Ok(NewlineIndex::build(content.bytes()).line_count())
}

/// Slice an inclusive 1-based line span out of `content`, with the end
/// clamped to the last line. Returns an empty string for spans entirely
/// past EOF.
pub fn slice_lines<'a>(content: &'a FileContent, range: LineRange) -> Cow<'a, str> {
    let bytes = content.bytes();
    let idx = NewlineIndex::build(bytes);
    match idx.byte_range(range, bytes) {
        Some((lo, hi)) => String::from_utf8_lossy(&bytes[lo..hi]),
        None => Cow::Borrowed(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_and_slices_small_file() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("f.py");
        let mut f = File::create(&path)?;
        writeln!(f, "line1\nline2\nline3")?;

        let content = read_file_smart(&path)?;
        assert_eq!(slice_lines(&content, LineRange(2, 3)), "line2\nline3");
        assert_eq!(count_lines(&path)?, 4); // trailing newline adds a line
        Ok(())
    }

    #[test]
    fn lossy_decode_tolerates_invalid_utf8() {
        let content = FileContent::Buffered(vec![b'o', b'k', 0xFF, b'\n', b'x']);
        let text = content.text();
        assert!(text.starts_with("ok"));
        assert_eq!(slice_lines(&content, LineRange(2, 2)), "x");
    }
}
