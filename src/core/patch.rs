//! Unified-diff scanning for changed base-revision lines.
//!
//! Ground truth is anchored at the *base* commit, so the interesting
//! coordinates are pre-patch: a removed line sits at its own base line,
//! an added line is anchored to the base line just before the insertion
//! point. Only hunks under recognizable `---`/`+++` headers contribute.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

static HUNK_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Compile-time constant pattern
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap()
});

/// Per-file changed base lines extracted from a unified diff.
pub type ChangedLines = BTreeMap<String, BTreeSet<u32>>;

/// Scan a patch into `{path → set<changed base line>}`.
///
/// File creation (`/dev/null` on the `---` side) and deletion produce no
/// base anchors beyond what the hunk bodies supply; unparseable sections
/// are skipped rather than failing the whole patch.
pub fn changed_lines_by_file(patch: &str) -> ChangedLines {
    let mut changed: ChangedLines = BTreeMap::new();

    let mut current_file: Option<String> = None;
    let mut in_hunk = false;
    let mut base_line: Option<u32> = None;

    for line in patch.lines() {
        if line.starts_with("diff --git ") {
            current_file = None;
            in_hunk = false;
            base_line = None;
            continue;
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            if let Some(path) = rest.strip_prefix("a/") {
                let path = path.trim();
                if !path.is_empty() && path != "/dev/null" {
                    current_file = Some(path.to_string());
                }
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(path) = rest.strip_prefix("b/") {
                let path = path.trim();
                if !path.is_empty() && path != "/dev/null" {
                    current_file = Some(path.to_string());
                }
            }
            continue;
        }

        if let Some(caps) = HUNK_RE.captures(line) {
            if current_file.is_none() {
                in_hunk = false;
                base_line = None;
                continue;
            }
            base_line = caps[1].parse::<u32>().ok();
            in_hunk = base_line.is_some();
            continue;
        }

        let (Some(file), Some(base), true) = (&current_file, base_line, in_hunk) else {
            continue;
        };

        let Some(prefix) = line.chars().next() else {
            continue;
        };

        match prefix {
            ' ' => {
                base_line = Some(base + 1);
            }
            '-' => {
                changed.entry(file.clone()).or_default().insert(base.max(1));
                base_line = Some(base + 1);
            }
            '+' => {
                // Anchor an insertion to the base line just before it
                let anchor = base.saturating_sub(1).max(1);
                changed.entry(file.clone()).or_default().insert(anchor);
            }
            '\\' => {
                // "\ No newline at end of file"
            }
            _ => {}
        }
    }

    changed
}
