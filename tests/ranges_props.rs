//! Property tests for the range algebra and path normalization.
//!
//! These pin the algebraic laws the metrics engine silently relies on:
//! merge idempotence, intersection symmetry, the merge length bound,
//! clustering stability, and normalization being a projection.

use locbench::core::paths::normalize_path;
use locbench::core::ranges::{self, LineRange};
use proptest::prelude::*;

/// Arbitrary valid line range with bounded coordinates.
fn arb_range() -> impl Strategy<Value = LineRange> {
    (1u32..500, 0u32..50).prop_map(|(start, len)| LineRange(start, start + len))
}

fn arb_ranges() -> impl Strategy<Value = Vec<LineRange>> {
    prop::collection::vec(arb_range(), 0..20)
}

proptest! {
    #[test]
    fn merge_is_idempotent(ranges in arb_ranges()) {
        let once = ranges::merge(&ranges);
        let twice = ranges::merge(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn merge_output_is_sorted_and_disjoint(ranges in arb_ranges()) {
        let merged = ranges::merge(&ranges);
        for pair in merged.windows(2) {
            // Strictly increasing with a real gap: touching ranges
            // would have been coalesced
            prop_assert!(pair[0].end() + 1 < pair[1].start());
        }
    }

    #[test]
    fn merge_length_is_bounded_by_sum(ranges in arb_ranges()) {
        let merged_len = ranges::total_len(&ranges::merge(&ranges));
        let raw_sum: u64 = ranges.iter().map(LineRange::len).sum();
        prop_assert!(merged_len <= raw_sum);
    }

    #[test]
    fn disjoint_ranges_merge_without_loss(seed in prop::collection::vec(1u32..30, 1..8)) {
        // Build ranges guaranteed disjoint and non-touching by spacing
        // their starts far apart
        let mut start = 1u32;
        let mut ranges = Vec::new();
        for len in seed {
            ranges.push(LineRange(start, start + len));
            start += len + 10;
        }
        let raw_sum: u64 = ranges.iter().map(LineRange::len).sum();
        prop_assert_eq!(ranges::total_len(&ranges::merge(&ranges)), raw_sum);
    }

    #[test]
    fn intersection_is_symmetric(a in arb_ranges(), b in arb_ranges()) {
        let a = ranges::merge(&a);
        let b = ranges::merge(&b);
        prop_assert_eq!(
            ranges::intersection_length(&a, &b),
            ranges::intersection_length(&b, &a)
        );
    }

    #[test]
    fn intersection_never_exceeds_either_side(a in arb_ranges(), b in arb_ranges()) {
        let a = ranges::merge(&a);
        let b = ranges::merge(&b);
        let inter = ranges::intersection_length(&a, &b);
        prop_assert!(inter <= ranges::total_len(&a));
        prop_assert!(inter <= ranges::total_len(&b));
    }

    #[test]
    fn self_intersection_is_identity(a in arb_ranges()) {
        let a = ranges::merge(&a);
        prop_assert_eq!(ranges::intersection_length(&a, &a), ranges::total_len(&a));
    }

    #[test]
    fn clustering_respects_the_gap(lines in prop::collection::vec(1u32..200, 1..30), gap in 0u32..6) {
        let clusters = ranges::cluster(&lines, gap);

        // Every input line is covered by some cluster
        for &line in &lines {
            prop_assert!(clusters.iter().any(|c| c.contains_line(line)));
        }

        // Adjacent clusters are separated by more than gap + 1
        for pair in clusters.windows(2) {
            prop_assert!(pair[1].start() > pair[0].end() + 1 + gap);
        }
    }

    #[test]
    fn cluster_of_single_line_is_a_point(line in 1u32..1000, gap in 0u32..6) {
        prop_assert_eq!(ranges::cluster(&[line], gap), vec![LineRange(line, line)]);
    }

    #[test]
    fn normalize_drops_everything_invalid(pairs in prop::collection::vec(
        (any::<i64>(), any::<i64>()), 0..10
    )) {
        let raw: Vec<Vec<i64>> = pairs.iter().map(|(s, e)| vec![*s, *e]).collect();
        for r in ranges::normalize(&raw) {
            prop_assert!(r.start() >= 1);
            prop_assert!(r.end() >= r.start());
        }
    }

    #[test]
    fn path_normalization_is_a_projection(
        prefix in prop::sample::select(vec!["", "./", "a/", "b/"]),
        components in prop::collection::vec("[c-z][a-z0-9_]{0,8}(\\.py)?", 1..5),
    ) {
        // Components never collide with the a/ b/ diff-prefix strip, so
        // one normalization reaches the fixed point
        let path = format!("{prefix}{}", components.join("/"));
        let once = normalize_path(&path, None);
        prop_assert_eq!(normalize_path(&once, None), once.clone());
    }
}
