//! The query context a dataset was fetched for.

use crate::extent::Extent;
use crate::types::{FieldDefinition, Timestamp};
use crate::utils::{duration_ns, truncate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Directive that a query may embed (typically in a comment) to override the
/// backfill tolerance for that query, in whole seconds.
pub const BACKFILL_TOLERANCE_FLAG: &str = "trickster-backfill-tolerance:";

/// Per-query override of the backfill tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackfillTolerance {
    /// Use the caller-provided default.
    #[default]
    Inherit,
    Fixed(Duration),
    /// Never treat recent data as volatile.
    Disabled,
}

/// A time-series range query parsed from an inbound request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeRangeQuery {
    #[serde(rename = "stmt")]
    pub statement: String,
    #[serde(rename = "ex")]
    pub extent: Extent,
    /// Step in nanoseconds; see [`TimeRangeQuery::step`].
    #[serde(rename = "step")]
    pub step_ns: u64,
    #[serde(skip)]
    pub is_offset: bool,
    #[serde(skip)]
    pub backfill_tolerance: BackfillTolerance,
    #[serde(rename = "rl")]
    pub record_limit: usize,
    #[serde(rename = "tfd")]
    pub timestamp_definition: FieldDefinition,
    #[serde(skip)]
    pub tag_field_definitions: Vec<FieldDefinition>,
    #[serde(rename = "cke")]
    pub cache_key_elements: BTreeMap<String, String>,
}

impl TimeRangeQuery {
    pub fn new(statement: &str, start: Timestamp, end: Timestamp, step: Duration) -> Self {
        Self {
            statement: statement.to_string(),
            extent: Extent::new(start, end),
            step_ns: duration_ns(step),
            ..Default::default()
        }
    }

    pub fn step(&self) -> Duration {
        Duration::from_nanos(self.step_ns)
    }

    pub fn set_step(&mut self, step: Duration) {
        self.step_ns = duration_ns(step);
    }

    /// Aligns the extent to step boundaries. Unless the query is offset, an
    /// end in the future is first clamped to `now`.
    pub fn normalize_extent(&mut self, now: Timestamp) {
        if self.step_ns == 0 {
            return;
        }
        if !self.is_offset && self.extent.end > now {
            self.extent.end = now;
        }
        self.extent.start = truncate(self.extent.start, self.step_ns);
        self.extent.end = truncate(self.extent.end, self.step_ns);
    }

    /// Resolves the tolerance for this query. Without an override, a window of
    /// `points` steps is used when it exceeds `default`.
    pub fn backfill_tolerance(&self, default: Duration, points: u32) -> Duration {
        match self.backfill_tolerance {
            BackfillTolerance::Fixed(d) => d,
            BackfillTolerance::Disabled => Duration::ZERO,
            BackfillTolerance::Inherit => {
                let window = self.step().saturating_mul(points);
                if points > 0 && window > default {
                    window
                } else {
                    default
                }
            }
        }
    }

    /// Looks for [`BACKFILL_TOLERANCE_FLAG`] in `input` and, when followed by
    /// digits, sets a fixed tolerance of that many seconds.
    pub fn extract_backfill_tolerance(&mut self, input: &str) {
        let Some(idx) = input.find(BACKFILL_TOLERANCE_FLAG) else {
            return;
        };
        let rest = &input[idx + BACKFILL_TOLERANCE_FLAG.len()..];
        let digits = rest
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if let Ok(secs) = rest[..digits].parse::<u64>() {
            self.backfill_tolerance = if secs == 0 {
                BackfillTolerance::Disabled
            } else {
                BackfillTolerance::Fixed(Duration::from_secs(secs))
            };
        }
    }

    /// Approximate memory utilization in bytes.
    pub fn size(&self) -> usize {
        self.statement.len() + 24 + 8 + self.timestamp_definition.size() + 11
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SECOND;

    #[test]
    fn normalize_truncates_to_step() {
        let mut trq = TimeRangeQuery::new("q", 1_005 * SECOND, 1_997 * SECOND, Duration::from_secs(10));
        trq.normalize_extent(5_000 * SECOND);
        assert_eq!(trq.extent, Extent::new(1_000 * SECOND, 1_990 * SECOND));
    }

    #[test]
    fn normalize_clamps_future_end_unless_offset() {
        let mut trq = TimeRangeQuery::new("q", 0, 9_000 * SECOND, Duration::from_secs(60));
        trq.normalize_extent(3_030 * SECOND);
        assert_eq!(trq.extent.end, 3_000 * SECOND);

        let mut offset = TimeRangeQuery::new("q", 0, 9_000 * SECOND, Duration::from_secs(60));
        offset.is_offset = true;
        offset.normalize_extent(3_030 * SECOND);
        assert_eq!(offset.extent.end, 9_000 * SECOND);
    }

    #[test]
    fn backfill_tolerance_resolution() {
        let def = Duration::from_secs(5);
        let mut trq = TimeRangeQuery::new("1234", 0, 0, Duration::ZERO);
        assert_eq!(trq.backfill_tolerance(def, 0), def);

        trq.backfill_tolerance = BackfillTolerance::Fixed(Duration::from_secs(30));
        assert_eq!(trq.backfill_tolerance(def, 0), Duration::from_secs(30));

        trq.backfill_tolerance = BackfillTolerance::Inherit;
        trq.set_step(Duration::from_secs(5));
        assert_eq!(trq.backfill_tolerance(def, 10), Duration::from_secs(50));

        trq.backfill_tolerance = BackfillTolerance::Disabled;
        assert_eq!(trq.backfill_tolerance(def, 10), Duration::ZERO);
    }

    #[test]
    fn extracts_tolerance_directive() {
        let mut trq = TimeRangeQuery::default();
        trq.extract_backfill_tolerance("testing trickster-backfill-tolerance:30 ");
        assert_eq!(trq.backfill_tolerance, BackfillTolerance::Fixed(Duration::from_secs(30)));

        let mut untouched = TimeRangeQuery::default();
        untouched.extract_backfill_tolerance("trickster-backfill-tolerance:abc");
        assert_eq!(untouched.backfill_tolerance, BackfillTolerance::Inherit);
    }
}
