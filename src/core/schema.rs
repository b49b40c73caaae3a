//! Canonical dataset records.
//!
//! `DatasetCase` is the unified case format produced by the dataset
//! pipeline and consumed by the runner. Cases are immutable once built;
//! everything here round-trips through newline-delimited JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::paths::FileRanges;
use crate::core::ranges::{self, LineRange};

/// One ground-truth function location: the full enclosing scope plus the
/// clustered sub-ranges covering the lines a reference patch changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthEntry {
    /// Repo-relative POSIX path.
    pub path: String,

    /// Function name.
    pub function: String,

    /// Enclosing class, when the function is a method.
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    /// Full function scope.
    pub range: LineRange,

    /// Changed-line clusters, all contained in `range`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_ranges: Vec<LineRange>,

    /// Definition header, whitespace-collapsed, no trailing body introducer.
    pub signature: String,
}

impl GroundTruthEntry {
    /// Dedup key: one entry per `(path, class, function, start_line)`.
    pub fn key(&self) -> (String, Option<String>, String, u32) {
        (
            self.path.clone(),
            self.class_name.clone(),
            self.function.clone(),
            self.range.start(),
        )
    }
}

/// A related but unmodified function offered as auxiliary signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub path: String,
    pub function: String,
    pub range: LineRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

/// LLM-evaluated solvability metadata, when a curation pass supplied one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvabilityInfo {
    pub solvable: bool,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

/// One benchmark case: issue text + repository revision + ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetCase {
    pub id: String,

    /// The natural-language issue description handed to the agent.
    pub query: String,

    /// `owner/name`.
    pub repo: String,

    /// Immutable hex revision the reference patch applies to.
    pub base_commit: String,

    /// Function-anchored ground truth; the primary scoring target.
    #[serde(default)]
    pub hard_gt: Vec<GroundTruthEntry>,

    /// Related-but-unmodified functions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub soft_context: Vec<ContextEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solvability: Option<SolvabilityInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl DatasetCase {
    /// Target ground truth: per path, the merged union of every entry's
    /// `target_ranges`, the lines the agent must find. Entries without
    /// target ranges fall back to their full scope.
    pub fn target_ground_truth(&self) -> FileRanges {
        let mut files: BTreeMap<String, Vec<LineRange>> = BTreeMap::new();
        for gt in &self.hard_gt {
            let entry = files.entry(gt.path.clone()).or_default();
            if gt.target_ranges.is_empty() {
                entry.push(gt.range);
            } else {
                entry.extend_from_slice(&gt.target_ranges);
            }
        }
        files.into_iter().map(|(p, r)| (p, ranges::merge(&r))).collect()
    }

    /// Context ground truth: per path, the merged union of full function
    /// scopes, the looser denominator for surrounding-context metrics.
    pub fn context_ground_truth(&self) -> FileRanges {
        let mut files: BTreeMap<String, Vec<LineRange>> = BTreeMap::new();
        for gt in &self.hard_gt {
            files.entry(gt.path.clone()).or_default().push(gt.range);
        }
        files.into_iter().map(|(p, r)| (p, ranges::merge(&r))).collect()
    }

    /// Per-function targets for hit-rate scoring: `(path, merged ranges)`
    /// using the full scope of each entry.
    pub fn function_targets(&self) -> Vec<(String, Vec<LineRange>)> {
        self.hard_gt
            .iter()
            .map(|gt| (gt.path.clone(), vec![gt.range]))
            .collect()
    }

    /// Structural validity per the dataset invariants. Violations carry a
    /// human-readable reason for the validate command.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty id".into());
        }
        if self.query.trim().is_empty() {
            return Err("empty query".into());
        }
        if self.repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return Err(format!("repo not in owner/name form: {:?}", self.repo));
        }
        if self.base_commit.is_empty() || !self.base_commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("base_commit not hex: {:?}", self.base_commit));
        }
        if self.hard_gt.is_empty() {
            return Err("empty hard_gt".into());
        }

        let mut seen = std::collections::BTreeSet::new();
        for gt in &self.hard_gt {
            if gt.function.is_empty() {
                return Err(format!("{}: empty function name", gt.path));
            }
            if gt.signature.is_empty() {
                return Err(format!("{}: empty signature for {}", gt.path, gt.function));
            }
            for t in &gt.target_ranges {
                if !gt.range.contains(t) {
                    return Err(format!(
                        "{}: target range {:?} escapes scope {:?} of {}",
                        gt.path, t, gt.range, gt.function
                    ));
                }
            }
            if ranges::merge(&gt.target_ranges) != gt.target_ranges {
                return Err(format!(
                    "{}: target ranges of {} are not sorted and disjoint",
                    gt.path, gt.function
                ));
            }
            if !seen.insert(gt.key()) {
                return Err(format!(
                    "{}: duplicate entry for {} at line {}",
                    gt.path,
                    gt.function,
                    gt.range.start()
                ));
            }
        }

        if let Some(s) = &self.solvability {
            if !(0.0..=1.0).contains(&s.confidence) {
                return Err(format!("solvability confidence out of [0,1]: {}", s.confidence));
            }
        }
        for ctx in &self.soft_context {
            if let Some(score) = ctx.relevance_score {
                if !(0.0..=1.0).contains(&score) {
                    return Err(format!("{}: relevance score out of [0,1]", ctx.path));
                }
            }
        }

        Ok(())
    }
}
