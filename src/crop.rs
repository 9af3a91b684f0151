//! Crop Engine: range-bounded and size-bounded (LRU) trimming of datasets.

use crate::dataset::{DataSet, DataSetResult};
use crate::extent::Extent;
use crate::extent_list::{ExtentList, ExtentListLRU};
use crate::point::{clone_range, point_range, points_size};
use crate::series::{Series, SeriesList};
use crate::telemetry::core_metrics;
use crate::types::Timestamp;
use crate::utils::duration_ns;
use rayon::prelude::*;
use tracing::debug;

/// Where a dataset's coverage sits relative to a crop range.
enum Overlap {
    /// Nothing to keep.
    None,
    /// All coverage is inside the range; only the extents need trimming.
    Inside,
    /// Coverage straddles a boundary; points must be sliced.
    Partial,
}

impl DataSet {
    fn overlap_with(&self, e: &Extent) -> Overlap {
        if self.extent_list.is_empty() || self.extent_list.outside_of(e) {
            Overlap::None
        } else if self.extent_list.encompassed_by(e) {
            Overlap::Inside
        } else {
            Overlap::Partial
        }
    }

    /// Reduces the dataset, in place, to timestamps within `e` (inclusive).
    /// Assumes every series is sorted; series left without points are dropped.
    pub fn crop_to_range(&mut self, e: &Extent) {
        core_metrics::record_range_crop();
        self.volatile_extent_list = self.volatile_extent_list.crop(e);
        match self.overlap_with(e) {
            Overlap::None => {
                self.clear_series();
                self.extent_list = ExtentList::new();
            }
            Overlap::Inside => {
                if self.value_count() == 0 {
                    self.clear_series();
                }
                self.extent_list = self.extent_list.crop(e);
            }
            Overlap::Partial => {
                self.extent_list = self.extent_list.crop(e);
                let (start, end) = (e.start, e.end);
                for r in &mut self.results {
                    r.series_list.par_iter_mut().for_each(|s| {
                        let range = point_range(&s.points, start, end);
                        if range.len() == s.points.len() {
                            return;
                        }
                        s.points.truncate(range.end);
                        s.points.drain(..range.start);
                        s.point_size = points_size(&s.points);
                    });
                    r.series_list.retain(|s| !s.points.is_empty());
                }
            }
        }
    }

    /// Returns a deep copy of the dataset cropped to `e`, leaving `self`
    /// untouched. Assumes every series is sorted.
    pub fn cropped_clone(&self, e: &Extent) -> DataSet {
        let _guard = self.lock_updates();
        match self.overlap_with(e) {
            Overlap::None => self.shell(),
            Overlap::Inside => {
                let mut clone = self.clone_unlocked();
                if clone.value_count() == 0 {
                    clone.clear_series();
                }
                clone.extent_list = clone.extent_list.crop(e);
                clone.volatile_extent_list = clone.volatile_extent_list.crop(e);
                clone
            }
            Overlap::Partial => {
                let mut clone = self.shell();
                clone.extent_list = self.extent_list.crop(e);
                clone.volatile_extent_list = self.volatile_extent_list.crop(e);
                clone.results = self
                    .results
                    .iter()
                    .map(|r| DataSetResult {
                        series_list: crop_series_list(&r.series_list, e.start, e.end),
                        ..clone_result_meta(r)
                    })
                    .collect();
                clone
            }
        }
    }

    /// Trims the dataset to at most `max_points` unique timestamps, evicting
    /// the least-recently-used timestamps first.
    ///
    /// Coverage past `now` is cropped away first. `used` is then stamped as
    /// last used at `now`, so it is only evicted once every colder timestamp
    /// is gone.
    pub fn crop_to_size(&mut self, max_points: usize, now: Timestamp, used: &Extent) {
        if self.extent_list.is_empty() {
            return;
        }
        if self.extent_list.last().is_some_and(|last| last.end > now) {
            self.crop_to_range(&Extent::new(0, now));
            if self.extent_list.is_empty() {
                return;
            }
        }

        let step = self.step();
        let lru = ExtentListLRU::from(self.extent_list.clone()).update_last_used(used, step, now);
        self.extent_list = lru.clone().into_extent_list();

        let total = self.extent_list.timestamp_count(step);
        let budget = max_points as u64;
        if total <= budget {
            return;
        }

        let step_ns = duration_ns(step);
        let mut remaining = total - budget;
        let mut order = lru;
        order.sort_by_last_used();
        let mut removals = ExtentList::new();
        for x in order.iter() {
            if remaining == 0 {
                break;
            }
            let count = if step_ns == 0 {
                1
            } else {
                (x.end - x.start) / step_ns + 1
            };
            if count <= remaining {
                removals.push(*x);
                remaining -= count;
            } else {
                let end = x.start + (remaining - 1) * step_ns;
                removals.push(x.cropped(x.start, end));
                remaining = 0;
            }
        }
        removals.sort_by_key(|r| r.start);

        self.extent_list = self.extent_list.remove(&removals, step).compress(step);
        self.volatile_extent_list = self.volatile_extent_list.remove(&removals, step);
        for r in &mut self.results {
            r.series_list.par_iter_mut().for_each(|s| {
                let before = s.points.len();
                s.points.retain(|p| !is_removed(&removals, p.epoch));
                if s.points.len() != before {
                    s.point_size = points_size(&s.points);
                }
            });
            r.series_list.retain(|s| !s.points.is_empty());
        }

        let evicted = total - budget;
        debug!(
            evicted,
            max_points,
            extents = self.extent_list.len(),
            "cropped dataset to size"
        );
        core_metrics::record_size_crop(evicted);
    }
}

/// True if `epoch` falls in one of the start-sorted, disjoint `removals`.
fn is_removed(removals: &[Extent], epoch: Timestamp) -> bool {
    let idx = removals.partition_point(|r| r.start <= epoch);
    idx > 0 && removals[idx - 1].includes(epoch)
}

fn clone_result_meta(r: &DataSetResult) -> DataSetResult {
    DataSetResult {
        statement_id: r.statement_id,
        name: r.name.clone(),
        error: r.error.clone(),
        series_list: SeriesList::new(),
    }
}

/// Copies, in parallel, the points of each series that fall in
/// `[start, end]`. Series with no such points are left out.
fn crop_series_list(sl: &SeriesList, start: Timestamp, end: Timestamp) -> SeriesList {
    let out: Vec<Series> = sl
        .par_iter()
        .filter_map(|s| {
            let range = point_range(&s.points, start, end);
            if range.is_empty() {
                return None;
            }
            Some(Series::new(s.header.clone(), clone_range(&s.points, range)))
        })
        .collect();
    SeriesList(out)
}
