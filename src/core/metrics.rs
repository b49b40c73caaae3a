//! Localization scoring at file, line, and function level.
//!
//! All comparisons happen on normalized paths and merged ranges; every
//! ratio degrades to 0.0 instead of NaN, and an empty ground-truth path
//! set scores recall 1.0 by convention. The matched-only line precisions
//! measure pure range accuracy: files the agent returned that ground
//! truth never mentions affect file precision, not line precision.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::paths::{self, FileRanges};
use crate::core::ranges::{self, LineRange};

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// β for the Fβ scores; 0.5 weighs precision over recall.
    pub beta: f64,

    /// Weight of the file-level Fβ inside the joint score.
    pub file_weight: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { beta: 0.5, file_weight: 0.5 }
    }
}

/// Every per-case measure the runner records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseMetrics {
    pub file_recall: f64,
    pub file_precision: f64,

    pub target_line_coverage: f64,
    pub target_line_precision_matched: f64,

    pub context_line_coverage: f64,
    pub context_line_precision_matched: f64,

    pub line_iou_matched: f64,

    pub file_f_beta: f64,
    pub line_f_beta: f64,
    pub joint_f_beta: f64,

    pub functions_hit: u32,
    pub functions_total: u32,
    pub function_hit_rate: f64,
}

/// Score one case.
///
/// `returned` is the harness output (already structurally validated);
/// `gt_target` / `gt_context` are the two derived ground-truth views;
/// `function_targets` carries one `(path, ranges)` per GT function.
pub fn compute_case_metrics(
    returned: &FileRanges,
    gt_target: &FileRanges,
    gt_context: &FileRanges,
    function_targets: &[(String, Vec<LineRange>)],
    repo_root: Option<&Path>,
    cfg: &MetricsConfig,
) -> CaseMetrics {
    // Defensive re-merge at the boundary: two-pointer intersection
    // assumes sorted, disjoint input
    let returned = paths::normalize_ground_truth(returned, repo_root);
    let target = paths::normalize_ground_truth(gt_target, repo_root);
    let context = paths::normalize_ground_truth(gt_context, repo_root);

    let matched = paths::matched_paths(&target, &returned);

    let file_recall = if target.is_empty() {
        1.0
    } else {
        matched.len() as f64 / target.len() as f64
    };

    let file_precision = if returned.is_empty() {
        0.0
    } else {
        matched.len() as f64 / returned.len() as f64
    };

    let (target_line_coverage, target_line_precision_matched) =
        line_scores(&target, &returned);
    let (context_line_coverage, context_line_precision_matched) =
        line_scores(&context, &returned);
    let line_iou_matched = iou_matched(&target, &returned);

    let (functions_hit, functions_total) =
        function_hits(function_targets, &returned, repo_root);
    let function_hit_rate = if functions_total > 0 {
        f64::from(functions_hit) / f64::from(functions_total)
    } else {
        0.0
    };

    let file_f_beta = f_score(file_precision, file_recall, cfg.beta);
    let line_f_beta = f_score(target_line_precision_matched, target_line_coverage, cfg.beta);
    let joint_f_beta = cfg.file_weight * file_f_beta + (1.0 - cfg.file_weight) * line_f_beta;

    CaseMetrics {
        file_recall,
        file_precision,
        target_line_coverage,
        target_line_precision_matched,
        context_line_coverage,
        context_line_precision_matched,
        line_iou_matched,
        file_f_beta,
        line_f_beta,
        joint_f_beta,
        functions_hit,
        functions_total,
        function_hit_rate,
    }
}

/// Coverage and matched precision over one ground-truth view.
///
/// Coverage: Σ intersection / Σ GT length, missing files contributing 0
/// to the numerator. Matched precision: Σ intersection / Σ returned
/// length restricted to paths present in both sets.
fn line_scores(gt: &FileRanges, returned: &FileRanges) -> (f64, f64) {
    let mut gt_total: u64 = 0;
    let mut covered: u64 = 0;
    let mut matched_returned_total: u64 = 0;
    let mut correct: u64 = 0;

    for (path, gt_ranges) in gt {
        gt_total += ranges::total_len(gt_ranges);

        let Some(ret_ranges) = returned.get(path) else {
            continue;
        };

        let inter = ranges::intersection_length(gt_ranges, ret_ranges);
        covered += inter;
        correct += inter;
        matched_returned_total += ranges::total_len(ret_ranges);
    }

    let coverage = if gt_total > 0 {
        covered as f64 / gt_total as f64
    } else {
        0.0
    };
    let precision = if matched_returned_total > 0 {
        correct as f64 / matched_returned_total as f64
    } else {
        0.0
    };

    (coverage, precision)
}

/// Σ intersection / Σ union over matched files only.
fn iou_matched(gt: &FileRanges, returned: &FileRanges) -> f64 {
    let mut intersection: u64 = 0;
    let mut union: u64 = 0;

    for (path, gt_ranges) in gt {
        let Some(ret_ranges) = returned.get(path) else {
            continue;
        };
        let inter = ranges::intersection_length(gt_ranges, ret_ranges);
        intersection += inter;
        union += ranges::total_len(gt_ranges) + ranges::total_len(ret_ranges) - inter;
    }

    if union > 0 {
        intersection as f64 / union as f64
    } else {
        0.0
    }
}

/// A function target is hit when any returned line overlaps its ranges.
fn function_hits(
    function_targets: &[(String, Vec<LineRange>)],
    returned: &FileRanges,
    repo_root: Option<&Path>,
) -> (u32, u32) {
    let mut hits: u32 = 0;
    let mut total: u32 = 0;

    for (raw_path, raw_ranges) in function_targets {
        let merged = ranges::merge(raw_ranges);
        if merged.is_empty() {
            continue;
        }
        let path = paths::normalize_path(raw_path, repo_root);

        total += 1;
        if let Some(ret_ranges) = returned.get(&path) {
            if ranges::intersection_length(&merged, ret_ranges) > 0 {
                hits += 1;
            }
        }
    }

    (hits, total)
}

/// `(1+β²)·P·R / (β²·P + R)`, 0.0 when the denominator vanishes.
pub fn f_score(precision: f64, recall: f64, beta: f64) -> f64 {
    let b2 = beta * beta;
    let denom = b2 * precision + recall;
    if denom > 0.0 {
        (1.0 + b2) * precision * recall / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn files(entries: &[(&str, &[LineRange])]) -> FileRanges {
        entries
            .iter()
            .map(|(p, r)| (p.to_string(), r.to_vec()))
            .collect()
    }

    fn score(returned: &FileRanges, target: &FileRanges) -> CaseMetrics {
        compute_case_metrics(
            returned,
            target,
            target,
            &[],
            None,
            &MetricsConfig::default(),
        )
    }

    #[test]
    fn exact_match_is_perfect() {
        let gt = files(&[("a.py", &[LineRange(10, 20)])]);
        let m = score(&gt, &gt);
        assert_eq!(m.file_recall, 1.0);
        assert_eq!(m.file_precision, 1.0);
        assert_eq!(m.target_line_coverage, 1.0);
        assert_eq!(m.target_line_precision_matched, 1.0);
        assert_eq!(m.line_iou_matched, 1.0);
    }

    #[test]
    fn superset_costs_precision_not_coverage() {
        let gt = files(&[("a.py", &[LineRange(10, 20)])]);
        let returned = files(&[("a.py", &[LineRange(1, 100)])]);
        let m = score(&returned, &gt);
        assert_eq!(m.target_line_coverage, 1.0);
        assert!((m.target_line_precision_matched - 0.11).abs() < 1e-9);
    }

    #[test]
    fn unrelated_file_hits_file_precision_only() {
        let gt = files(&[("a.py", &[LineRange(10, 20)])]);
        let returned = files(&[
            ("a.py", &[LineRange(10, 20)][..]),
            ("b.py", &[LineRange(1, 5)][..]),
        ]);
        let m = score(&returned, &gt);
        assert_eq!(m.file_recall, 1.0);
        assert_eq!(m.file_precision, 0.5);
        // Matched-only denominator excludes b.py
        assert_eq!(m.target_line_precision_matched, 1.0);
    }

    #[test]
    fn empty_gt_scores_recall_one() {
        let gt = FileRanges::new();
        let returned = files(&[("a.py", &[LineRange(1, 5)])]);
        let m = score(&returned, &gt);
        assert_eq!(m.file_recall, 1.0);
        assert_eq!(m.file_precision, 0.0);
    }

    #[test]
    fn empty_returned_scores_clean_zero() {
        let gt = files(&[("a.py", &[LineRange(10, 20)])]);
        let m = score(&FileRanges::new(), &gt);
        assert_eq!(m.file_recall, 0.0);
        assert_eq!(m.file_precision, 0.0);
        assert_eq!(m.target_line_coverage, 0.0);
        assert_eq!(m.joint_f_beta, 0.0);
    }

    #[test]
    fn function_hit_requires_any_overlap() {
        let returned = files(&[("a.py", &[LineRange(15, 16)])]);
        let targets = vec![
            ("a.py".to_string(), vec![LineRange(10, 20)]),
            ("a.py".to_string(), vec![LineRange(30, 40)]),
            ("b.py".to_string(), vec![LineRange(1, 5)]),
        ];
        let m = compute_case_metrics(
            &returned,
            &FileRanges::new(),
            &FileRanges::new(),
            &targets,
            None,
            &MetricsConfig::default(),
        );
        assert_eq!(m.functions_hit, 1);
        assert_eq!(m.functions_total, 3);
        assert!((m.function_hit_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn f_score_edges() {
        assert_eq!(f_score(0.0, 0.0, 0.5), 0.0);
        assert_eq!(f_score(1.0, 1.0, 0.5), 1.0);
        // β=1 reduces to harmonic mean
        assert!((f_score(0.5, 1.0, 1.0) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_stay_within_unit_interval() {
        let gt = files(&[("a.py", &[LineRange(5, 9), LineRange(20, 30)])]);
        let returned = files(&[
            ("a.py", &[LineRange(1, 7)][..]),
            ("z.py", &[LineRange(1, 2)][..]),
        ]);
        let m = score(&returned, &gt);
        for v in [
            m.file_recall,
            m.file_precision,
            m.target_line_coverage,
            m.target_line_precision_matched,
            m.line_iou_matched,
            m.file_f_beta,
            m.line_f_beta,
            m.joint_f_beta,
        ] {
            assert!((0.0..=1.0).contains(&v), "metric out of range: {v}");
        }
    }

    #[test]
    fn path_normalization_applies_before_comparison() {
        let gt = files(&[("src/x.py", &[LineRange(1, 5)])]);
        let mut returned = BTreeMap::new();
        returned.insert("a/src/x.py".to_string(), vec![LineRange(1, 5)]);
        let m = score(&returned, &gt);
        assert_eq!(m.file_recall, 1.0);
        assert_eq!(m.target_line_coverage, 1.0);
    }
}
