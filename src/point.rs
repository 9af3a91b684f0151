//! Time-series data points and the sorted-slice helpers used by merge and crop.

use crate::types::{Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One timestamp plus its ordered values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub epoch: Timestamp,
    /// Byte-size estimate of the point, including its values.
    pub size: usize,
    pub values: Vec<Value>,
}

impl Point {
    pub fn new(epoch: Timestamp, values: Vec<Value>) -> Self {
        let size = 8 + values.iter().map(Value::size).sum::<usize>();
        Self {
            epoch,
            size,
            values,
        }
    }
}

/// Index of the first point whose epoch is `>= ts`, or `points.len()`.
/// Requires `points` sorted by epoch.
#[inline]
pub fn on_or_just_after(points: &[Point], ts: Timestamp) -> usize {
    points.partition_point(|p| p.epoch < ts)
}

/// Index of the last point whose epoch is `<= ts`, if any.
/// Requires `points` sorted by epoch.
#[inline]
pub fn on_or_just_before(points: &[Point], ts: Timestamp) -> Option<usize> {
    points.partition_point(|p| p.epoch <= ts).checked_sub(1)
}

/// Half-open index range of the points whose epoch lies in `[start, end]`.
pub fn point_range(points: &[Point], start: Timestamp, end: Timestamp) -> Range<usize> {
    let lo = on_or_just_after(points, start);
    let hi = match on_or_just_before(points, end) {
        Some(i) => i + 1,
        None => 0,
    };
    if lo >= hi {
        lo..lo
    } else {
        lo..hi
    }
}

/// Sorts by epoch (stable) and collapses duplicate epochs. Among duplicates
/// the highest-index point wins, so appending newer data then sorting lets
/// the newer value replace the older one.
pub fn sort_and_dedupe(points: &mut Vec<Point>) {
    points.sort_by_key(|p| p.epoch);
    points.dedup_by(|later, kept| {
        if later.epoch == kept.epoch {
            std::mem::swap(later, kept);
            true
        } else {
            false
        }
    });
}

/// Concatenates `incoming` after `existing`; when `sort` is set the result is
/// sorted and deduplicated with `incoming` winning on equal epochs.
pub fn merge_points(mut existing: Vec<Point>, incoming: &[Point], sort: bool) -> Vec<Point> {
    existing.reserve(incoming.len());
    existing.extend_from_slice(incoming);
    if sort {
        sort_and_dedupe(&mut existing);
    }
    existing
}

/// Deep copy of `points[range]`. An out-of-bounds or inverted range yields
/// an empty vector.
pub fn clone_range(points: &[Point], range: Range<usize>) -> Vec<Point> {
    points.get(range).map(<[Point]>::to_vec).unwrap_or_default()
}

/// Memory utilization of a point slice in bytes.
pub fn points_size(points: &[Point]) -> usize {
    16 + points.iter().map(|p| p.size).sum::<usize>()
}

/// True if both slices hold the same points in the same order.
pub fn points_equal(a: &[Point], b: &[Point]) -> bool {
    a == b
}
