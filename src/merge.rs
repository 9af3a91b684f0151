//! Merge Engine: reconciles a dataset with newly fetched datasets.

use crate::dataset::DataSet;
use crate::series::SeriesMergeStats;
use crate::telemetry::core_metrics;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

impl DataSet {
    /// Merges `incoming` into this dataset, in order.
    ///
    /// Coverage becomes the union of every extent list, compressed at this
    /// dataset's step. Results are matched by statement id: unknown
    /// statements are appended whole, known ones have their series merged by
    /// header hash (see [`crate::series::SeriesList::merge_for_statement`]).
    /// With `sort` set, merged series are sorted and deduplicated so the
    /// latest-arriving value wins for a repeated epoch.
    pub fn merge(&mut self, sort: bool, incoming: &[&DataSet]) {
        if incoming.is_empty() {
            return;
        }
        let started = Instant::now();
        let step = self.step();

        let mut by_statement: HashMap<i32, usize> = HashMap::with_capacity(self.results.len());
        for (i, r) in self.results.iter().enumerate() {
            by_statement.entry(r.statement_id).or_insert(i);
        }

        let mut totals = SeriesMergeStats::default();
        for other in incoming {
            let _guard = other.lock_updates();
            self.extent_list = self.extent_list.merge(&other.extent_list, step);
            for r in &other.results {
                if r.series_list.is_empty() {
                    continue;
                }
                match by_statement.get(&r.statement_id) {
                    Some(&i) => {
                        let stats = self.results[i].series_list.merge_for_statement(
                            r.statement_id,
                            &r.series_list,
                            sort,
                        );
                        totals.matched += stats.matched;
                        totals.added += stats.added;
                        totals.points += stats.points;
                    }
                    None => {
                        by_statement.insert(r.statement_id, self.results.len());
                        totals.added += r.series_list.len();
                        totals.points += r.series_list.iter().map(|s| s.points.len()).sum::<usize>();
                        self.results.push(r.clone());
                    }
                }
            }
        }

        debug!(
            datasets = incoming.len(),
            matched = totals.matched,
            added = totals.added,
            points = totals.points,
            extents = self.extent_list.len(),
            "merged datasets"
        );
        core_metrics::record_merge(
            started.elapsed(),
            totals.matched as u64,
            totals.added as u64,
            totals.points as u64,
        );
    }
}
