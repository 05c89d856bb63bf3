//! Root-segment reduction.
//!
//! A segment fully nested inside the segment kept before it is redundant.
//! The walk keeps whichever segment it meets first in the scan direction.

use serde::{Deserialize, Serialize};

use crate::replay::ReplayResult;
use crate::segment::Segment;

/// Anything with a `[start, end]` range in event-relative seconds.
pub trait TimeRange {
    fn range_start(&self) -> f64;
    fn range_end(&self) -> f64;

    /// Whether `self` lies within `other` (bounds inclusive).
    fn nested_in(&self, other: &impl TimeRange) -> bool
    where
        Self: Sized,
    {
        self.range_start() >= other.range_start() && self.range_end() <= other.range_end()
    }
}

impl TimeRange for Segment {
    fn range_start(&self) -> f64 {
        self.start
    }

    fn range_end(&self) -> f64 {
        self.end
    }
}

impl TimeRange for ReplayResult {
    fn range_start(&self) -> f64 {
        self.effective_start()
    }

    fn range_end(&self) -> f64 {
        self.effective_end()
    }
}

/// Direction a list was sorted in by start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanOrder {
    #[default]
    Ascending,
    Descending,
}

/// Drop nested segments from a list already sorted in `order`.
///
/// Ascending: a candidate inside the last kept segment is dropped.
/// Descending: a candidate enclosing the last kept segment is dropped, which
/// mirrors the ascending walk on the reversed list.
///
/// The list is not re-sorted. Running the reduction twice gives the same
/// result as running it once.
pub fn reduce_to_roots<T: TimeRange>(items: Vec<T>, order: ScanOrder) -> Vec<T> {
    let mut roots: Vec<T> = Vec::with_capacity(items.len());

    for candidate in items {
        let redundant = match roots.last() {
            Some(kept) => match order {
                ScanOrder::Ascending => candidate.nested_in(kept),
                ScanOrder::Descending => kept.nested_in(&candidate),
            },
            None => false,
        };
        if !redundant {
            roots.push(candidate);
        }
    }

    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64) -> Segment {
        Segment::new("p", "e", "c", start, end)
    }

    fn bounds(items: &[Segment]) -> Vec<(f64, f64)> {
        items.iter().map(|s| (s.start, s.end)).collect()
    }

    #[test]
    fn test_nested_child_dropped() {
        let input = vec![seg(10.0, 12.0), seg(10.2, 11.5), seg(20.0, 25.0)];
        let roots = reduce_to_roots(input, ScanOrder::Ascending);
        assert_eq!(bounds(&roots), vec![(10.0, 12.0), (20.0, 25.0)]);
    }

    #[test]
    fn test_multiple_children_compared_against_parent() {
        let input = vec![
            seg(0.0, 10.0),
            seg(1.0, 2.0),
            seg(3.0, 4.0),
            seg(10.0, 10.0),
            seg(9.0, 12.0),
        ];
        let roots = reduce_to_roots(input, ScanOrder::Ascending);
        assert_eq!(bounds(&roots), vec![(0.0, 10.0), (9.0, 12.0)]);
    }

    #[test]
    fn test_partial_overlap_kept() {
        let input = vec![seg(0.0, 5.0), seg(4.0, 8.0)];
        assert_eq!(reduce_to_roots(input, ScanOrder::Ascending).len(), 2);
    }

    #[test]
    fn test_descending_keeps_first_encountered() {
        let input = vec![seg(20.0, 25.0), seg(10.2, 11.5), seg(10.0, 12.0)];
        let roots = reduce_to_roots(input, ScanOrder::Descending);
        assert_eq!(bounds(&roots), vec![(20.0, 25.0), (10.2, 11.5)]);
    }

    #[test]
    fn test_idempotent() {
        let lists = vec![
            vec![seg(10.0, 12.0), seg(10.2, 11.5), seg(20.0, 25.0)],
            vec![seg(0.0, 10.0), seg(1.0, 2.0), seg(5.0, 15.0), seg(6.0, 7.0), seg(6.0, 16.0)],
            vec![seg(3.0, 3.0), seg(3.0, 3.0), seg(3.0, 4.0)],
            vec![],
        ];
        for order in [ScanOrder::Ascending, ScanOrder::Descending] {
            for list in &lists {
                let mut sorted = list.clone();
                if order == ScanOrder::Descending {
                    sorted.reverse();
                }
                let once = reduce_to_roots(sorted, order);
                let twice = reduce_to_roots(once.clone(), order);
                assert_eq!(bounds(&once), bounds(&twice));
            }
        }
    }

    #[test]
    fn test_results_use_effective_range() {
        let outer = ReplayResult::new(10.0, 12.0);
        let inner = ReplayResult::new(9.0, 13.0).with_optimized(10.5, 11.0);
        let roots = reduce_to_roots(vec![outer, inner], ScanOrder::Ascending);
        assert_eq!(roots.len(), 1);
    }
}
