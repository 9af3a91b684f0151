//! Interval algebra over ordered lists of [`Extent`]s.
//!
//! Most operations assume the list is sorted ascending by start and
//! non-overlapping (i.e. it has been through [`ExtentList::compress`]). The
//! boundary tests only look at the first and last element and do not
//! re-validate that precondition.

use crate::extent::Extent;
use crate::types::Timestamp;
use crate::utils::{duration_ns, truncate, SECOND};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Approximate memory footprint of one extent, in bytes.
const EXTENT_SIZE: usize = 72;

/// An ordered list of extents describing which time ranges are present.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtentList(pub Vec<Extent>);

/// How [`ExtentList::splice`] subdivides each extent. Exactly one policy
/// applies per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplicePolicy {
    /// Pieces no wider than the given wall-clock range.
    MaxRange(Duration),
    /// Pieces that never cross a multiple of the given cadence (epoch-relative).
    Aligned(Duration),
    /// Pieces holding at most this many timestamps.
    MaxPoints(usize),
}

impl ExtentList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// True if the list's overall boundaries cover all of `e`.
    pub fn encompasses(&self, e: &Extent) -> bool {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => first.start <= e.start && last.end >= e.end,
            _ => false,
        }
    }

    /// True if the list's overall boundaries lie completely within `e`.
    pub fn encompassed_by(&self, e: &Extent) -> bool {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => {
                first.start >= e.start
                    && first.start <= e.end
                    && last.end >= e.start
                    && last.end <= e.end
            }
            _ => false,
        }
    }

    /// True if `e` falls completely outside the list's boundaries. An empty
    /// list is outside of everything.
    pub fn outside_of(&self, e: &Extent) -> bool {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => e.start > last.end || first.start > e.end,
            _ => true,
        }
    }

    /// Returns the sublist restricted to `[e.start, e.end]`. Boundary extents
    /// are truncated; an extent touching the crop range at a single point is
    /// kept as a zero-width extent at that point.
    pub fn crop(&self, e: &Extent) -> ExtentList {
        if e.start > e.end {
            return ExtentList::new();
        }
        self.iter()
            .filter(|x| x.overlaps(e))
            .map(|x| x.cropped(x.start.max(e.start), x.end.min(e.end)))
            .collect()
    }

    /// Sorts the list and merges extents so that coverage is represented by
    /// as few extents as possible.
    ///
    /// Overlapping extents always merge (keeping the most recent
    /// `last_used`). Extents that are contiguous within one `step` merge only
    /// when they share the same `last_used`, so LRU boundaries survive.
    pub fn compress(&self, step: Duration) -> ExtentList {
        if self.is_empty() {
            return ExtentList::new();
        }
        let step = duration_ns(step);
        let mut sorted = self.0.clone();
        sorted.sort_by_key(|e| (e.start, e.end));
        let mut out = compress_pass(sorted, step);
        loop {
            let len = out.len();
            out = compress_pass(out, step);
            if out.len() == len {
                break;
            }
        }
        ExtentList(out)
    }

    /// Union of `self` and `other`, compressed.
    pub fn merge(&self, other: &ExtentList, step: Duration) -> ExtentList {
        let mut all = Vec::with_capacity(self.len() + other.len());
        all.extend_from_slice(self);
        all.extend_from_slice(other);
        ExtentList(all).compress(step)
    }

    /// Subdivides each extent into upstream-request-sized pieces according to
    /// `policy`. Pieces are adjacent on the `step` grid and keep the source
    /// extent's `last_used`. A zero step or a zero-sized policy leaves the
    /// list unchanged.
    pub fn splice(&self, step: Duration, policy: SplicePolicy) -> ExtentList {
        let step = duration_ns(step);
        if step == 0 {
            return self.clone();
        }
        let mut out = Vec::with_capacity(self.len());
        for x in self.iter() {
            let mut start = x.start;
            loop {
                let end = match policy {
                    SplicePolicy::MaxRange(range) => {
                        let range = duration_ns(range);
                        if range == 0 {
                            x.end
                        } else {
                            start.saturating_add(range.saturating_sub(step))
                        }
                    }
                    SplicePolicy::MaxPoints(0) => x.end,
                    SplicePolicy::MaxPoints(n) => {
                        start.saturating_add(step.saturating_mul(n as u64 - 1))
                    }
                    SplicePolicy::Aligned(cadence) => {
                        let cadence = duration_ns(cadence);
                        if cadence == 0 {
                            x.end
                        } else {
                            let boundary = truncate(start, cadence).saturating_add(cadence);
                            boundary.saturating_sub(step).max(start)
                        }
                    }
                }
                .min(x.end);
                out.push(x.cropped(start, end));
                if end >= x.end {
                    break;
                }
                match end.checked_add(step) {
                    Some(next) if next <= x.end => start = next,
                    _ => break,
                }
            }
        }
        ExtentList(out)
    }

    /// Subtracts `removals` from the list. Extents fully covered by a removal
    /// are dropped; partially covered extents are split around it.
    pub fn remove(&self, removals: &ExtentList, step: Duration) -> ExtentList {
        if removals.is_empty() {
            return self.clone();
        }
        let gran = duration_ns(step).max(1);
        let mut out = Vec::with_capacity(self.len());
        for x in self.iter() {
            let mut pieces = vec![*x];
            for r in removals.iter() {
                let mut next = Vec::with_capacity(pieces.len() + 1);
                for p in pieces {
                    if !p.overlaps(r) {
                        next.push(p);
                        continue;
                    }
                    if p.start < r.start {
                        let end = r.start.saturating_sub(gran).max(p.start);
                        next.push(p.cropped(p.start, end));
                    }
                    if p.end > r.end {
                        let start = r.end.saturating_add(gran).min(p.end);
                        next.push(p.cropped(start, p.end));
                    }
                }
                pieces = next;
                if pieces.is_empty() {
                    break;
                }
            }
            out.extend(pieces);
        }
        ExtentList(out)
    }

    /// Returns the sub-ranges of `want` that are missing from this list,
    /// walking `want` at `step` granularity.
    ///
    /// The walk keeps a cursor into a sorted copy of the list, so each
    /// timestamp is tested against at most a few extents.
    pub fn calculate_deltas(&self, want: &Extent, step: Duration) -> ExtentList {
        if want.start > want.end {
            return ExtentList::new();
        }
        if self.is_empty() {
            return ExtentList(vec![*want]);
        }
        let step = duration_ns(step);
        if step == 0 {
            if self.iter().any(|x| x.contains(want)) {
                return ExtentList::new();
            }
            return ExtentList(vec![Extent::new(want.start, want.end)]);
        }

        let mut have = self.0.clone();
        have.sort_by_key(|e| e.start);

        let mut out = Vec::new();
        let mut gap_start: Option<Timestamp> = None;
        let mut last_miss = want.start;
        let mut cursor = 0usize;
        let mut t = want.start;
        loop {
            while cursor < have.len() && have[cursor].end < t {
                cursor += 1;
            }
            let found = cursor < have.len() && have[cursor].start <= t;
            if found {
                if let Some(start) = gap_start.take() {
                    out.push(Extent::new(start, last_miss));
                }
            } else {
                gap_start.get_or_insert(t);
                last_miss = t;
            }
            match t.checked_add(step) {
                Some(next) if next <= want.end => t = next,
                _ => break,
            }
        }
        if let Some(start) = gap_start {
            out.push(Extent::new(start, last_miss));
        }
        ExtentList(out)
    }

    /// Number of timestamps the extents represent at the given step. With a
    /// zero step every extent counts once.
    pub fn timestamp_count(&self, step: Duration) -> u64 {
        let step = duration_ns(step);
        if step == 0 {
            return self.len() as u64;
        }
        self.iter()
            .map(|e| (e.end.saturating_sub(e.start) / step) + 1)
            .fold(0u64, |acc, n| acc.saturating_add(n))
    }

    /// Approximate memory utilization in bytes.
    pub fn size(&self) -> usize {
        self.len() * EXTENT_SIZE
    }
}

/// One left-to-right merge pass over a start-sorted vector.
fn compress_pass(sorted: Vec<Extent>, step: u64) -> Vec<Extent> {
    let mut out: Vec<Extent> = Vec::with_capacity(sorted.len());
    for x in sorted {
        if let Some(cur) = out.last_mut() {
            if x.start <= cur.end {
                cur.end = cur.end.max(x.end);
                cur.last_used = cur.last_used.max(x.last_used);
                continue;
            }
            if x.last_used == cur.last_used && x.start <= cur.end.saturating_add(step) {
                cur.end = x.end;
                continue;
            }
        }
        out.push(x);
    }
    out
}

impl Deref for ExtentList {
    type Target = Vec<Extent>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ExtentList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<Extent>> for ExtentList {
    fn from(v: Vec<Extent>) -> Self {
        ExtentList(v)
    }
}

impl FromIterator<Extent> for ExtentList {
    fn from_iter<I: IntoIterator<Item = Extent>>(iter: I) -> Self {
        ExtentList(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ExtentList {
    type Item = &'a Extent;
    type IntoIter = std::slice::Iter<'a, Extent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ExtentList {
    /// `startMs-endMs` pairs joined by commas.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

/// An extent list viewed in least-recently-used order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtentListLRU(pub Vec<Extent>);

impl ExtentListLRU {
    /// Stable sort, oldest `last_used` first; ties keep chronological order.
    pub fn sort_by_last_used(&mut self) {
        self.0.sort_by_key(|e| (e.last_used, e.start));
    }

    /// Marks the portion of the list overlapping `used` as last used at `now`
    /// (truncated to the second), splitting extents at the boundaries of
    /// `used` and re-compressing the result.
    pub fn update_last_used(&self, used: &Extent, step: Duration, now: Timestamp) -> ExtentListLRU {
        if self.0.is_empty() || used.start > used.end {
            return self.clone();
        }
        let now = truncate(now, SECOND);
        let gran = duration_ns(step).max(1);
        let mut out = Vec::with_capacity(self.0.len() + 2);

        for &x in &self.0 {
            if used.start <= x.start && used.end >= x.end {
                out.push(Extent { last_used: now, ..x });
                continue;
            }
            if x.start > used.end || x.end < used.start {
                out.push(x);
                continue;
            }
            let mut x = x;
            if used.start > x.start {
                let left_end = used.start.saturating_sub(gran).max(x.start);
                out.push(x.cropped(x.start, left_end));
                x.start = used.start;
            }
            if used.end < x.end {
                let right_start = used.end.saturating_add(gran).min(x.end);
                out.push(Extent::with_last_used(x.start, used.end, now));
                out.push(x.cropped(right_start, x.end));
            } else {
                out.push(Extent { last_used: now, ..x });
            }
        }
        ExtentListLRU(ExtentList(out).compress(step).0)
    }

    pub fn into_extent_list(self) -> ExtentList {
        ExtentList(self.0)
    }
}

impl From<ExtentList> for ExtentListLRU {
    fn from(el: ExtentList) -> Self {
        ExtentListLRU(el.0)
    }
}

impl Deref for ExtentListLRU {
    type Target = Vec<Extent>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ExtentListLRU {
    /// `startSec-endSec:lastUsedSec` triples joined by commas.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(
                f,
                "{}-{}:{}",
                e.start / SECOND,
                e.end / SECOND,
                e.last_used / SECOND
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: u64) -> Timestamp {
        secs * SECOND
    }

    fn ext(start: u64, end: u64) -> Extent {
        Extent::new(t(start), t(end))
    }

    fn ext_lu(start: u64, end: u64, lu: u64) -> Extent {
        Extent::with_last_used(t(start), t(end), t(lu))
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn three() -> ExtentList {
        ExtentList(vec![ext(100, 200), ext(600, 900), ext(1100, 1300)])
    }

    #[test]
    fn crop_table() {
        let cases: Vec<(Extent, Vec<Extent>)> = vec![
            (ext(98, 1300), vec![ext(100, 200), ext(600, 900), ext(1100, 1300)]),
            (ext(101, 1300), vec![ext(101, 200), ext(600, 900), ext(1100, 1300)]),
            (ext(200, 1300), vec![ext(200, 200), ext(600, 900), ext(1100, 1300)]),
            (ext(201, 1300), vec![ext(600, 900), ext(1100, 1300)]),
            (ext(99, 1200), vec![ext(100, 200), ext(600, 900), ext(1100, 1200)]),
            (ext(200, 1200), vec![ext(200, 200), ext(600, 900), ext(1100, 1200)]),
            (ext(98, 98), vec![]),
            (ext(98, 99), vec![]),
            (ext(98, 100), vec![ext(100, 100)]),
            (ext(98, 101), vec![ext(100, 101)]),
            (ext(100, 200), vec![ext(100, 200)]),
            (ext(1000, 1300), vec![ext(1100, 1300)]),
            (ext(1300, 1300), vec![ext(1300, 1300)]),
            (ext(1300, 1400), vec![ext(1300, 1300)]),
            (ext(900, 1400), vec![ext(900, 900), ext(1100, 1300)]),
            (ext(98, 1400), vec![ext(100, 200), ext(600, 900), ext(1100, 1300)]),
        ];
        for (i, (range, expected)) in cases.into_iter().enumerate() {
            assert_eq!(three().crop(&range), ExtentList(expected), "case {}", i);
        }
        assert!(ExtentList::new().crop(&ext(98, 1400)).is_empty());
    }

    #[test]
    fn crop_does_not_mutate_source() {
        let el = three();
        let _ = el.crop(&ext(150, 650));
        assert_eq!(el, three());
    }

    #[test]
    fn boundary_predicates() {
        let el = three();
        assert!(el.encompasses(&ext(100, 1300)));
        assert!(el.encompasses(&ext(150, 1250)));
        assert!(!el.encompasses(&ext(99, 1300)));

        assert!(el.encompassed_by(&ext(0, 2000)));
        assert!(!el.encompassed_by(&ext(100, 100)));
        assert!(!el.encompassed_by(&ext(201, 201)));
        assert!(!ExtentList::new().encompassed_by(&ext(100, 100)));

        assert!(!el.outside_of(&ext(100, 100)));
        assert!(!el.outside_of(&ext(0, 100)));
        assert!(el.outside_of(&ext(0, 0)));
        assert!(!el.outside_of(&ext(201, 201)));
        assert!(el.outside_of(&ext(1400, 1400)));
        assert!(ExtentList::new().outside_of(&ext(100, 100)));
    }

    #[test]
    fn compress_merges_adjacent_and_duplicates() {
        let step = secs(30);
        let cases = vec![
            (vec![], vec![]),
            (
                vec![ext(30, 30), ext(90, 120), ext(120, 180), ext(180, 210)],
                vec![ext(30, 30), ext(90, 210)],
            ),
            (vec![ext(0, 30)], vec![ext(0, 30)]),
            (
                vec![
                    ext(0, 30),
                    ext(90, 120),
                    ext(120, 180),
                    ext(270, 360),
                    ext(180, 210),
                    ext(420, 480),
                ],
                vec![ext(0, 30), ext(90, 210), ext(270, 360), ext(420, 480)],
            ),
            (
                vec![ext(90, 120), ext(90, 120), ext(180, 180), ext(180, 180)],
                vec![ext(90, 120), ext(180, 180)],
            ),
            (vec![ext(0, 30), ext(60, 90)], vec![ext(0, 90)]),
        ];
        for (i, (input, expected)) in cases.into_iter().enumerate() {
            assert_eq!(ExtentList(input).compress(step), ExtentList(expected), "case {}", i);
        }
    }

    #[test]
    fn compress_keeps_lru_boundaries_between_adjacent_extents() {
        let el = ExtentList(vec![ext_lu(0, 30, 5), ext_lu(60, 90, 6)]);
        assert_eq!(el.compress(secs(30)), el);
        let overlapping = ExtentList(vec![ext_lu(0, 60, 5), ext_lu(30, 90, 6)]);
        assert_eq!(
            overlapping.compress(secs(30)),
            ExtentList(vec![ext_lu(0, 90, 6)])
        );
    }

    #[test]
    fn size_and_display() {
        let el = ExtentList(vec![ext(90, 120), ext(90, 120), ext(180, 180), ext(180, 180)]);
        assert_eq!(el.size(), 288);
        assert_eq!(three().to_string(), "100000-200000,600000-900000,1100000-1300000");
        assert_eq!(ExtentList::new().to_string(), "");
    }

    #[test]
    fn calculate_deltas_table() {
        let cases: Vec<(Vec<Extent>, Vec<Extent>, u64, u64)> = vec![
            (vec![], vec![ext(1, 100)], 1, 100),
            (vec![ext(50, 100)], vec![ext(1, 49)], 1, 100),
            (vec![ext(50, 100)], vec![ext(1, 49), ext(101, 101)], 1, 101),
            (vec![ext(1, 100)], vec![ext(101, 101)], 1, 101),
            (vec![ext(10, 20), ext(40, 50)], vec![ext(1, 9), ext(21, 39), ext(51, 60)], 1, 60),
            (vec![ext(1, 100)], vec![], 1, 100),
        ];
        for (i, (have, expected, start, end)) in cases.into_iter().enumerate() {
            let d = ExtentList(have).calculate_deltas(&ext(start, end), secs(1));
            assert_eq!(d, ExtentList(expected), "case {}", i);
        }
    }

    #[test]
    fn calculate_deltas_inverted_want_is_empty() {
        let d = ExtentList(vec![Extent::default()]).calculate_deltas(&ext(20, 10), secs(10));
        assert!(d.is_empty());
    }

    #[test]
    fn timestamp_count_per_step() {
        assert_eq!(three().timestamp_count(secs(100)), 2 + 4 + 3);
        assert_eq!(three().timestamp_count(Duration::ZERO), 3);
        assert_eq!(ExtentList::new().timestamp_count(secs(1)), 0);
    }

    #[test]
    fn splice_by_range_points_and_alignment() {
        let el = ExtentList(vec![ext(0, 200)]);
        assert_eq!(
            el.splice(secs(10), SplicePolicy::MaxRange(secs(60))),
            ExtentList(vec![ext(0, 50), ext(60, 110), ext(120, 170), ext(180, 200)])
        );
        assert_eq!(
            el.splice(secs(10), SplicePolicy::MaxPoints(10)),
            ExtentList(vec![ext(0, 90), ext(100, 190), ext(200, 200)])
        );
        let offset = ExtentList(vec![ext(30, 250)]);
        assert_eq!(
            offset.splice(secs(10), SplicePolicy::Aligned(secs(100))),
            ExtentList(vec![ext(30, 90), ext(100, 190), ext(200, 250)])
        );
        assert_eq!(el.splice(Duration::ZERO, SplicePolicy::MaxPoints(2)), el);
    }

    #[test]
    fn remove_splits_and_drops() {
        let step = secs(100);
        let removals = ExtentList(vec![ext(700, 800), ext(1100, 1300)]);
        assert_eq!(
            three().remove(&removals, step),
            ExtentList(vec![ext(100, 200), ext(600, 600), ext(900, 900)])
        );
        let all = ExtentList(vec![ext(0, 2000)]);
        assert!(three().remove(&all, step).is_empty());
        assert_eq!(three().remove(&ExtentList::new(), step), three());
    }

    #[test]
    fn update_last_used_splits_extents() {
        let now = t(5000) + 123;
        let step = secs(100);
        let cases: Vec<(Vec<Extent>, Extent, String)> = vec![
            (
                vec![ext_lu(100, 1300, 1300)],
                ext(200, 600),
                "100-100:1300,200-600:5000,700-1300:1300".to_string(),
            ),
            (
                vec![
                    ext_lu(100, 200, 200),
                    ext_lu(600, 900, 900),
                    ext_lu(1100, 1300, 900),
                    ext_lu(1400, 1400, 1400),
                ],
                ext(1100, 1400),
                "100-200:200,600-900:900,1100-1400:5000".to_string(),
            ),
            (
                vec![
                    ext_lu(100, 200, 200),
                    ext_lu(600, 900, 900),
                    ext_lu(1100, 1300, 900),
                    ext_lu(1400, 1400, 1400),
                ],
                ext(1200, 1400),
                "100-200:200,600-900:900,1100-1100:900,1200-1400:5000".to_string(),
            ),
            (
                vec![
                    ext_lu(100, 200, 200),
                    ext_lu(600, 900, 900),
                    ext_lu(1100, 1300, 900),
                    ext_lu(1400, 1400, 1400),
                ],
                ext(600, 900),
                "100-200:200,600-900:5000,1100-1300:900,1400-1400:1400".to_string(),
            ),
            (
                vec![
                    ext_lu(100, 200, 200),
                    ext_lu(300, 900, 900),
                    ext_lu(1000, 1300, 900),
                    ext_lu(1400, 1400, 1400),
                ],
                ext(200, 1300),
                "100-100:200,200-1300:5000,1400-1400:1400".to_string(),
            ),
            (vec![], ext(200, 1300), String::new()),
        ];
        for (i, (input, used, expected)) in cases.into_iter().enumerate() {
            let got = ExtentListLRU(input).update_last_used(&used, step, now);
            assert_eq!(got.to_string(), expected, "case {}", i);
        }
    }

    #[test]
    fn update_last_used_ignores_inverted_range() {
        let input = ExtentListLRU(vec![ext_lu(100, 200, 200), ext_lu(600, 900, 900)]);
        let got = input.update_last_used(&ext(800, 150), secs(100), t(5_000));
        assert_eq!(got, input);
    }

    #[test]
    fn lru_sort_orders_by_last_used() {
        let mut el = ExtentListLRU(vec![
            ext_lu(600, 900, 900),
            ext_lu(100, 200, 200),
            ext_lu(1100, 1300, 1100),
        ]);
        el.sort_by_last_used();
        assert_eq!(
            el.0,
            vec![ext_lu(100, 200, 200), ext_lu(600, 900, 900), ext_lu(1100, 1300, 1100)]
        );
    }
}
