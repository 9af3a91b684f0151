//! A closed time interval with a last-used marker.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Start and end times (inclusive) for a range of data, plus the time the
/// range was last read from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent {
    #[serde(rename = "start")]
    pub start: Timestamp,
    #[serde(rename = "end")]
    pub end: Timestamp,
    #[serde(rename = "lu")]
    pub last_used: Timestamp,
}

impl Extent {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            last_used: 0,
        }
    }

    pub fn with_last_used(start: Timestamp, end: Timestamp, last_used: Timestamp) -> Self {
        Self {
            start,
            end,
            last_used,
        }
    }

    /// Returns a copy with the provided bounds, keeping `last_used`.
    pub fn cropped(self, start: Timestamp, end: Timestamp) -> Self {
        Self { start, end, ..self }
    }

    /// True if `t` falls within `[start, end]`.
    #[inline]
    pub fn includes(&self, t: Timestamp) -> bool {
        t >= self.start && t <= self.end
    }

    /// True if `other` is a subset of this extent.
    #[inline]
    pub fn contains(&self, other: &Extent) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// True if the two extents share at least one timestamp.
    #[inline]
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    #[inline]
    pub fn starts_at(&self, t: Timestamp) -> bool {
        self.start == t
    }

    #[inline]
    pub fn starts_before(&self, t: Timestamp) -> bool {
        self.start < t
    }

    #[inline]
    pub fn starts_after(&self, t: Timestamp) -> bool {
        self.start > t
    }

    #[inline]
    pub fn starts_at_or_before(&self, t: Timestamp) -> bool {
        self.start <= t
    }

    #[inline]
    pub fn starts_at_or_after(&self, t: Timestamp) -> bool {
        self.start >= t
    }

    #[inline]
    pub fn ends_at(&self, t: Timestamp) -> bool {
        self.end == t
    }

    #[inline]
    pub fn ends_before(&self, t: Timestamp) -> bool {
        self.end < t
    }

    #[inline]
    pub fn ends_after(&self, t: Timestamp) -> bool {
        self.end > t
    }

    #[inline]
    pub fn ends_at_or_before(&self, t: Timestamp) -> bool {
        self.end <= t
    }

    #[inline]
    pub fn ends_at_or_after(&self, t: Timestamp) -> bool {
        self.end >= t
    }
}

impl fmt::Display for Extent {
    /// Renders as `startMs-endMs`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start / 1_000_000, self.end / 1_000_000)
    }
}
