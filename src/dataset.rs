//! The canonical in-memory time-series container.
//!
//! A [`DataSet`] holds one [`DataSetResult`] per source statement, each with an
//! ordered [`SeriesList`], plus the [`ExtentList`] describing which time ranges
//! those series actually cover. Merge and crop keep the two in sync; see
//! [`crate::merge`] and [`crate::crop`].

use crate::extent_list::ExtentList;
use crate::series::{SeriesHash, SeriesList};
use crate::timerange::TimeRangeQuery;
use crate::utils::safe_add_usize;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Addresses a series across results during merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesLookupKey {
    pub statement_id: i32,
    pub hash: SeriesHash,
}

impl SeriesLookupKey {
    pub fn new(statement_id: i32, hash: SeriesHash) -> Self {
        Self { statement_id, hash }
    }
}

/// The series produced by one statement of the source query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSetResult {
    pub statement_id: i32,
    pub name: String,
    pub error: String,
    pub series_list: SeriesList,
}

impl DataSetResult {
    pub fn new(statement_id: i32, series_list: SeriesList) -> Self {
        Self {
            statement_id,
            series_list,
            ..Default::default()
        }
    }

    /// Approximate memory utilization in bytes.
    pub fn size(&self) -> usize {
        8 + self.name.len() + self.error.len() + self.series_list.size()
    }
}

/// One or more results plus their time coverage.
#[derive(Debug, Default)]
pub struct DataSet {
    pub status: String,
    /// Time ranges represented in `results`.
    pub extent_list: ExtentList,
    pub results: Vec<DataSetResult>,
    pub error: String,
    pub error_type: String,
    pub warnings: Vec<String>,
    pub time_range_query: Option<TimeRangeQuery>,
    /// Ranges that are cached but must be refreshed on the next request.
    pub volatile_extent_list: ExtentList,
    update_lock: Mutex<()>,
}

impl DataSet {
    pub fn new(time_range_query: Option<TimeRangeQuery>) -> Self {
        Self {
            time_range_query,
            ..Default::default()
        }
    }

    /// Serializes readers that must observe a consistent snapshot.
    pub(crate) fn lock_updates(&self) -> MutexGuard<'_, ()> {
        self.update_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Step of the attached query, or zero without one.
    pub fn step(&self) -> Duration {
        self.time_range_query
            .as_ref()
            .map(TimeRangeQuery::step)
            .unwrap_or(Duration::ZERO)
    }

    /// Unique timestamps represented by the extent list at the dataset's step.
    pub fn timestamp_count(&self) -> u64 {
        self.extent_list.timestamp_count(self.step())
    }

    pub fn series_count(&self) -> usize {
        self.results.iter().map(|r| r.series_list.len()).sum()
    }

    /// Total points across every series.
    pub fn value_count(&self) -> usize {
        self.results
            .iter()
            .flat_map(|r| r.series_list.iter())
            .map(|s| s.points.len())
            .sum()
    }

    /// Approximate memory utilization in bytes. Overflow saturates at the
    /// last representable total instead of wrapping.
    pub fn size(&self) -> usize {
        let mut c = self.status.len() + 49 + self.extent_list.size() + self.error.len();
        for r in &self.results {
            let (next, _) = safe_add_usize(c, r.size());
            c = next;
        }
        c
    }

    pub fn set_extents(&mut self, el: ExtentList) {
        self.extent_list = el;
    }

    pub fn set_volatile_extents(&mut self, el: ExtentList) {
        self.volatile_extent_list = el;
    }

    pub fn set_time_range_query(&mut self, trq: Option<TimeRangeQuery>) {
        self.time_range_query = trq;
    }

    /// Sorts every series' points by epoch, collapsing duplicates.
    pub fn sort(&mut self) {
        for r in &mut self.results {
            r.series_list.sort_points();
        }
    }

    /// Empties every result's series list, keeping the results themselves.
    pub(crate) fn clear_series(&mut self) {
        for r in &mut self.results {
            r.series_list.clear();
        }
    }

    /// A copy of the dataset's metadata whose results carry no series.
    /// Callers hold the update lock.
    pub(crate) fn shell(&self) -> DataSet {
        DataSet {
            status: self.status.clone(),
            extent_list: ExtentList::new(),
            results: self
                .results
                .iter()
                .map(|r| DataSetResult {
                    statement_id: r.statement_id,
                    name: r.name.clone(),
                    error: r.error.clone(),
                    series_list: SeriesList::new(),
                })
                .collect(),
            error: self.error.clone(),
            error_type: self.error_type.clone(),
            warnings: self.warnings.clone(),
            time_range_query: self.time_range_query.clone(),
            volatile_extent_list: ExtentList::new(),
            update_lock: Mutex::new(()),
        }
    }

    /// Deep copy. Callers hold the update lock.
    pub(crate) fn clone_unlocked(&self) -> DataSet {
        DataSet {
            extent_list: self.extent_list.clone(),
            results: self.results.clone(),
            volatile_extent_list: self.volatile_extent_list.clone(),
            ..self.shell()
        }
    }
}

impl Clone for DataSet {
    fn clone(&self) -> Self {
        let _guard = self.lock_updates();
        self.clone_unlocked()
    }
}

impl PartialEq for DataSet {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.extent_list == other.extent_list
            && self.results == other.results
            && self.error == other.error
            && self.error_type == other.error_type
            && self.warnings == other.warnings
            && self.time_range_query == other.time_range_query
            && self.volatile_extent_list == other.volatile_extent_list
    }
}
