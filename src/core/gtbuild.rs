//! Function-anchored ground-truth derivation.
//!
//! Takes patch-derived changed lines for one case and produces
//! `GroundTruthEntry` records: for every changed line, the smallest
//! enclosing function, with clustered target sub-ranges covering what the
//! patch actually touched. Files that fail to parse, and changes that
//! land outside any function, contribute nothing; quality guards reject
//! whole cases that look like parser noise.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::patch::ChangedLines;
use crate::core::ranges::{self, LineRange};
use crate::core::schema::GroundTruthEntry;
use crate::infra::io::read_file_smart;
use crate::infra::line_index::NewlineIndex;
use crate::parsers::index::{AstIndex, Definition, IndexerRegistry};

/// Maximum clustered target ranges per function before collapsing to the
/// single bounding range.
pub const MAX_TARGET_RANGES_PER_FUNCTION: usize = 2;

/// Cluster gap: changed lines at most this many apart coalesce.
pub const TARGET_RANGE_GAP: u32 = 3;

/// Maximum distinct target functions per case.
pub const MAX_GT_BLOCKS: usize = 10;

/// Directories whose contents never produce ground truth.
const EXCLUDED_DIRS: &[&str] = &["tests", "docs", "doc", ".github", ".circleci"];

/// Why a case produced no ground truth. Skip reasons, not crashes: the
/// pipeline records them and moves on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroundTruthError {
    #[error("no_eligible_paths: patch touches no eligible source file")]
    NoEligiblePaths,

    #[error("no_valid_function_gt: no changed line falls inside a parseable function")]
    NoValidFunctionGt,

    #[error("too_many_blocks: {count} distinct functions exceeds {max}")]
    TooManyBlocks { count: usize, max: usize },

    #[error("single_line_ratio_exceeded: {single} of {total} functions are single-line")]
    SingleLineRatioExceeded { single: usize, total: usize },
}

/// Tunable guard thresholds, defaulted to the canonical values.
#[derive(Debug, Clone)]
pub struct BuildLimits {
    pub target_range_gap: u32,
    pub max_target_ranges_per_function: usize,
    pub max_gt_blocks: usize,
}

impl Default for BuildLimits {
    fn default() -> Self {
        Self {
            target_range_gap: TARGET_RANGE_GAP,
            max_target_ranges_per_function: MAX_TARGET_RANGES_PER_FUNCTION,
            max_gt_blocks: MAX_GT_BLOCKS,
        }
    }
}

/// A path is eligible iff a language backend claims its extension and no
/// component is an excluded directory. Totality: every path is exactly one
/// of eligible or excluded.
pub fn is_eligible_path(rel_path: &str, registry: &IndexerRegistry) -> bool {
    let path = Path::new(rel_path);
    if registry.for_path(path).is_none() {
        return false;
    }
    !path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
    })
}

pub struct GroundTruthBuilder<'a> {
    registry: &'a IndexerRegistry,
    limits: BuildLimits,

    /// Per-file definition cache; repeated cases over one repo re-parse
    /// nothing. Keyed by absolute path, safe because the working tree is
    /// pinned to a commit while the builder runs.
    index_cache: Cache<PathBuf, Arc<AstIndex>>,
}

impl<'a> GroundTruthBuilder<'a> {
    pub fn new(registry: &'a IndexerRegistry, limits: BuildLimits) -> Self {
        Self {
            registry,
            limits,
            index_cache: Cache::new(4096),
        }
    }

    /// Derive entries for one case from its changed lines.
    pub fn build(
        &self,
        repo_root: &Path,
        changed: &ChangedLines,
    ) -> Result<Vec<GroundTruthEntry>, GroundTruthError> {
        let eligible: Vec<(&String, &std::collections::BTreeSet<u32>)> = changed
            .iter()
            .filter(|(path, _)| is_eligible_path(path, self.registry))
            .collect();

        if eligible.is_empty() {
            return Err(GroundTruthError::NoEligiblePaths);
        }

        let mut entries: Vec<GroundTruthEntry> = Vec::new();
        for (rel_path, lines) in eligible {
            entries.extend(self.build_for_file(repo_root, rel_path, lines));
        }

        // One entry per (path, class, function, start_line)
        let mut seen = std::collections::BTreeSet::new();
        entries.retain(|e| seen.insert(e.key()));

        if entries.is_empty() {
            return Err(GroundTruthError::NoValidFunctionGt);
        }

        if entries.len() > self.limits.max_gt_blocks {
            return Err(GroundTruthError::TooManyBlocks {
                count: entries.len(),
                max: self.limits.max_gt_blocks,
            });
        }

        // Mostly single-line "functions" is parser noise or mistargeting
        let single = entries
            .iter()
            .filter(|e| e.range.start() == e.range.end())
            .count();
        if single * 2 > entries.len() {
            return Err(GroundTruthError::SingleLineRatioExceeded {
                single,
                total: entries.len(),
            });
        }

        Ok(entries)
    }

    /// Entries for one file; empty on any per-file rejection.
    fn build_for_file(
        &self,
        repo_root: &Path,
        rel_path: &str,
        changed_lines: &std::collections::BTreeSet<u32>,
    ) -> Vec<GroundTruthEntry> {
        let full_path = repo_root.join(rel_path);

        let content = match read_file_smart(&full_path) {
            Ok(c) => c,
            Err(err) => {
                warn!(path = rel_path, %err, "skipping unreadable file");
                return Vec::new();
            }
        };

        let total_lines = NewlineIndex::build(content.bytes()).line_count() as u32;
        if total_lines == 0 {
            return Vec::new();
        }

        // Discard changed lines outside the file
        let target_lines: Vec<u32> = changed_lines
            .iter()
            .copied()
            .filter(|&l| l >= 1 && l <= total_lines)
            .collect();
        if target_lines.is_empty() {
            return Vec::new();
        }

        let index = match self.index_of(&full_path, &content.text()) {
            Some(ix) => ix,
            None => {
                debug!(path = rel_path, "no usable AST index; file rejected");
                return Vec::new();
            }
        };

        // Smallest enclosing function per changed line, grouped by identity
        type Key = (Option<String>, String, u32);
        let mut selected: BTreeMap<Key, (Definition, Vec<u32>)> = BTreeMap::new();
        for &line in &target_lines {
            if let Some(def) = index.enclosing_function(line) {
                let key = (def.container.clone(), def.name.clone(), def.start_line);
                selected
                    .entry(key)
                    .or_insert_with(|| (def.clone(), Vec::new()))
                    .1
                    .push(line);
            }
        }

        let mut entries = Vec::with_capacity(selected.len());
        for (_, (def, lines_in_scope)) in selected {
            if def.name.is_empty() || def.signature.is_empty() {
                continue;
            }

            let scope = match LineRange::new(def.start_line, def.end_line) {
                Some(r) => r,
                None => continue,
            };

            let target_ranges = self.target_ranges(&lines_in_scope, scope);
            if target_ranges.is_empty() {
                continue;
            }

            entries.push(GroundTruthEntry {
                path: rel_path.to_string(),
                function: def.name,
                class_name: def.container,
                range: scope,
                target_ranges,
                signature: def.signature,
            });
        }

        entries
    }

    /// Cluster changed lines within one function scope. Fragmented edits
    /// collapse to the bounding range so targets stay compact.
    fn target_ranges(&self, lines_in_scope: &[u32], scope: LineRange) -> Vec<LineRange> {
        let mut clusters = ranges::cluster(lines_in_scope, self.limits.target_range_gap);
        if clusters.len() > self.limits.max_target_ranges_per_function {
            let lo = lines_in_scope.iter().copied().min().unwrap_or(scope.start());
            let hi = lines_in_scope.iter().copied().max().unwrap_or(scope.end());
            clusters = LineRange::new(lo, hi).into_iter().collect();
        }

        clusters
            .into_iter()
            .filter_map(|r| r.clamp_to(scope.start(), scope.end()))
            .collect()
    }

    fn index_of(&self, full_path: &Path, content: &str) -> Option<Arc<AstIndex>> {
        if let Some(cached) = self.index_cache.get(full_path) {
            return if cached.is_empty() { None } else { Some(cached) };
        }

        let indexer = self.registry.for_path(full_path)?;
        let index = match indexer.index(content) {
            Ok(ix) => Arc::new(ix),
            Err(err) => {
                warn!(path = %full_path.display(), %err, "AST indexing failed");
                Arc::new(AstIndex::empty())
            }
        };

        self.index_cache.insert(full_path.to_path_buf(), index.clone());
        if index.is_empty() { None } else { Some(index) }
    }
}
