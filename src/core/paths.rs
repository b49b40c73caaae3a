//! Path canonicalization for ground-truth comparison.
//!
//! Returned paths arrive in whatever shape the agent produced: absolute
//! under the repo root, repo-relative, `./`-prefixed, or carrying diff
//! artifacts (`a/`, `b/`). Everything is normalized to a repo-relative
//! POSIX string before set comparison. Matching is exact normalized-string
//! equality; basename matching is deliberately not offered because it
//! produces false positives across large repos. Matching is byte-exact
//! (case-sensitive) on every host.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::core::ranges::{self, LineRange};

/// File → merged ranges, keyed by normalized path. The canonical in-memory
/// shape for both returned files and ground-truth views.
pub type FileRanges = BTreeMap<String, Vec<LineRange>>;

/// Canonicalize a single path string.
///
/// 1. Trim whitespace.
/// 2. Strip a leading `./`.
/// 3. Strip a leading `a/` or `b/` (diff artifacts).
/// 4. Relativize absolute paths against `repo_root` when given; an
///    absolute path outside the root stays absolute (it will not match
///    ground truth, but remains comparable).
/// 5. POSIX separators.
pub fn normalize_path(path: &str, repo_root: Option<&Path>) -> String {
    let mut stripped = path.trim();

    if let Some(rest) = stripped.strip_prefix("./") {
        stripped = rest;
    }
    if let Some(rest) = stripped.strip_prefix("a/").or_else(|| stripped.strip_prefix("b/")) {
        stripped = rest;
    }

    let as_path = PathBuf::from(stripped);
    if as_path.is_absolute() {
        if let Some(root) = repo_root {
            // dunce avoids UNC-decorated roots on Windows check-outs
            let root = dunce::simplified(root);
            if let Ok(rel) = as_path.strip_prefix(root) {
                return to_posix(rel);
            }
        }
        return to_posix(&as_path);
    }

    to_posix(&as_path)
}

/// Render a path with `/` separators, dropping `.` components.
fn to_posix(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::RootDir => parts.push(String::new()),
            Component::Prefix(p) => parts.push(p.as_os_str().to_string_lossy().into_owned()),
            other => parts.push(other.as_os_str().to_string_lossy().into_owned()),
        }
    }
    parts.join("/")
}

/// Normalize a returned-files map: canonicalize paths, validate raw
/// `[start, end]` pairs (dropping inverted/zero-based ones), and merge
/// ranges per normalized path. Paths that normalize to the same string
/// have their ranges combined.
pub fn normalize_returned(
    returned: &BTreeMap<String, Vec<Vec<i64>>>,
    repo_root: Option<&Path>,
) -> FileRanges {
    let mut out: BTreeMap<String, Vec<LineRange>> = BTreeMap::new();
    for (raw_path, raw_ranges) in returned {
        let path = normalize_path(raw_path, repo_root);
        if path.is_empty() {
            continue;
        }
        out.entry(path).or_default().extend(ranges::normalize(raw_ranges));
    }

    out.into_iter().map(|(p, r)| (p, ranges::merge(&r))).collect()
}

/// Normalize a ground-truth view: canonicalize paths and merge ranges.
/// Ground truth is already typed, so no pair validation is needed here.
pub fn normalize_ground_truth(gt: &FileRanges, repo_root: Option<&Path>) -> FileRanges {
    let mut out: BTreeMap<String, Vec<LineRange>> = BTreeMap::new();
    for (raw_path, gt_ranges) in gt {
        let path = normalize_path(raw_path, repo_root);
        if path.is_empty() {
            continue;
        }
        out.entry(path).or_default().extend_from_slice(gt_ranges);
    }

    out.into_iter().map(|(p, r)| (p, ranges::merge(&r))).collect()
}

/// Paths present in both sets under exact normalized equality.
pub fn matched_paths<'a>(gt: &'a FileRanges, returned: &FileRanges) -> Vec<&'a str> {
    gt.keys()
        .filter(|p| returned.contains_key(p.as_str()))
        .map(String::as_str)
        .collect()
}
