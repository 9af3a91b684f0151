//! Small shared helpers: guarded arithmetic and clock access.

use crate::types::Timestamp;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds in one second.
pub const SECOND: Timestamp = 1_000_000_000;

/// Adds `b` to `a`, returning `(a + b, true)`, or `(a, false)` if the addition
/// would overflow. The prior value is left untouched on overflow.
#[inline]
pub fn safe_add(a: i64, b: i64) -> (i64, bool) {
    match a.checked_add(b) {
        Some(v) => (v, true),
        None => (a, false),
    }
}

/// `usize` flavour of [`safe_add`].
#[inline]
pub fn safe_add_usize(a: usize, b: usize) -> (usize, bool) {
    match a.checked_add(b) {
        Some(v) => (v, true),
        None => (a, false),
    }
}

/// Current wall clock as nanoseconds since the Unix epoch.
pub fn now_ns() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as Timestamp
}

/// Converts a duration to whole nanoseconds, saturating at `u64::MAX`.
#[inline]
pub fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Truncates a timestamp down to a multiple of `step`. A zero step is a no-op.
#[inline]
pub fn truncate(ts: Timestamp, step: u64) -> Timestamp {
    if step == 0 {
        return ts;
    }
    ts - (ts % step)
}
