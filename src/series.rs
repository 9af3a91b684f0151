//! Series, their headers, and content-hash identity.

use crate::dataset::SeriesLookupKey;
use crate::point::{merge_points, points_size, sort_and_dedupe, Point};
use crate::pool;
use crate::types::{FieldDefinition, Tags};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use xxhash_rust::xxh3::Xxh3;

/// Structural identity of a series.
pub type SeriesHash = u64;

const HASH_SEPARATOR: u8 = 0xff;

/// Describes the shape and attributes of a series.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeriesHeader {
    pub name: String,
    pub tags: Tags,
    pub timestamp_field: FieldDefinition,
    pub tag_fields: Vec<FieldDefinition>,
    pub value_fields: Vec<FieldDefinition>,
    pub query_statement: String,
    /// Memory utilization of the header in bytes, see [`SeriesHeader::calculate_size`].
    pub size: usize,
}

impl SeriesHeader {
    /// Deterministic XXH3 digest over the identity-bearing fields. Two headers
    /// with equal name, query, tags and field names/types hash equally no
    /// matter where or when they were built.
    pub fn calculate_hash(&self) -> SeriesHash {
        let mut h = Xxh3::new();
        h.update(self.name.as_bytes());
        h.update(&[HASH_SEPARATOR]);
        h.update(self.query_statement.as_bytes());
        h.update(&[HASH_SEPARATOR]);
        for (k, v) in &self.tags {
            h.update(k.as_bytes());
            h.update(b"=");
            h.update(v.as_bytes());
            h.update(&[HASH_SEPARATOR]);
        }
        let fields = std::iter::once(&self.timestamp_field)
            .chain(self.tag_fields.iter())
            .chain(self.value_fields.iter());
        for fd in fields {
            h.update(fd.name.as_bytes());
            h.update(&[fd.data_type as u8, HASH_SEPARATOR]);
        }
        h.digest()
    }

    /// Computes, stores and returns the header size.
    pub fn calculate_size(&mut self) -> usize {
        let tags: usize = self.tags.iter().map(|(k, v)| k.len() + v.len()).sum();
        let fields: usize = std::iter::once(&self.timestamp_field)
            .chain(self.tag_fields.iter())
            .chain(self.value_fields.iter())
            .map(|fd| fd.name.len() + 17)
            .sum();
        self.size = self.name.len() + tags + 8 + self.query_statement.len() + 28 + fields;
        self.size
    }
}

/// A named, tagged, time-ordered list of points.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    pub header: SeriesHeader,
    pub points: Vec<Point>,
    /// Cached byte total of `points`.
    pub point_size: usize,
}

impl Series {
    pub fn new(header: SeriesHeader, points: Vec<Point>) -> Self {
        let point_size = points_size(&points);
        Self {
            header,
            points,
            point_size,
        }
    }

    /// Appends `incoming` and, when `sort` is set, sorts and dedupes with the
    /// incoming points winning on equal epochs.
    pub fn merge_points(&mut self, incoming: &[Point], sort: bool) {
        let existing = std::mem::take(&mut self.points);
        self.points = merge_points(existing, incoming, sort);
        self.point_size = points_size(&self.points);
    }

    pub fn sort_points(&mut self) {
        sort_and_dedupe(&mut self.points);
        self.point_size = points_size(&self.points);
    }

    /// Approximate memory utilization in bytes.
    pub fn size(&self) -> usize {
        self.header.size + self.point_size + 16
    }
}

/// Counters describing one [`SeriesList::merge_for_statement`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeriesMergeStats {
    pub matched: usize,
    pub added: usize,
    pub points: usize,
}

/// An ordered list of series.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesList(pub Vec<Series>);

impl SeriesList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Merges `incoming` into this list. See [`SeriesList::merge_for_statement`].
    pub fn merge(&mut self, incoming: &SeriesList, sort: bool) -> SeriesMergeStats {
        self.merge_for_statement(0, incoming, sort)
    }

    /// Merges `incoming` into this list, matching series by header hash.
    ///
    /// Matched series get the incoming points appended (in parallel). Series
    /// not yet present are positioned using the incoming order as a hint: a
    /// new series lands right after the series that preceded it in
    /// `incoming`. New series with no predecessor go to the front when the
    /// incoming list also holds known series, otherwise to the back. The
    /// resulting order is a best guess, not a canonical one.
    pub fn merge_for_statement(
        &mut self,
        statement_id: i32,
        incoming: &SeriesList,
        sort: bool,
    ) -> SeriesMergeStats {
        let mut stats = SeriesMergeStats::default();
        if incoming.is_empty() {
            return stats;
        }
        if self.is_empty() {
            self.0 = incoming.0.clone();
            stats.added = incoming.len();
            stats.points = incoming.iter().map(|s| s.points.len()).sum();
            return stats;
        }

        let pools = pool::pools();
        let mut lookup = pools.lookup_map();
        let mut seen = pools.hash_set();
        for (i, s) in self.iter().enumerate() {
            lookup
                .entry(SeriesLookupKey::new(statement_id, s.header.calculate_hash()))
                .or_insert(i);
        }

        let mut matches: Vec<Option<&Series>> = vec![None; self.len()];
        let mut leading: Vec<&Series> = Vec::new();
        let mut after: Vec<Vec<&Series>> = vec![Vec::new(); self.len()];
        let mut anchor: Option<usize> = None;

        for s in incoming.iter() {
            let key = SeriesLookupKey::new(statement_id, s.header.calculate_hash());
            if !seen.insert(key) {
                continue;
            }
            match lookup.get(&key) {
                Some(&i) => {
                    matches[i] = Some(s);
                    anchor = Some(i);
                    stats.matched += 1;
                }
                None => {
                    match anchor {
                        Some(i) => after[i].push(s),
                        None => leading.push(s),
                    }
                    stats.added += 1;
                }
            }
            stats.points += s.points.len();
        }

        self.0
            .par_iter_mut()
            .zip(matches.par_iter())
            .for_each(|(existing, m)| {
                if let Some(inc) = m {
                    existing.merge_points(&inc.points, sort);
                }
            });

        if stats.added == 0 {
            return stats;
        }
        let leading_first = stats.matched > 0;
        let existing = std::mem::take(&mut self.0);
        let mut out = Vec::with_capacity(existing.len() + stats.added);
        if leading_first {
            out.extend(leading.iter().map(|s| (*s).clone()));
        }
        for (s, followers) in existing.into_iter().zip(after) {
            out.push(s);
            out.extend(followers.into_iter().cloned());
        }
        if !leading_first {
            out.extend(leading.into_iter().cloned());
        }
        self.0 = out;
        stats
    }

    /// True if both lists hold series with identical headers in the same order.
    pub fn equal_header(&self, other: &SeriesList) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.header.calculate_hash() == b.header.calculate_hash())
    }

    /// Orders series by their tags, then name.
    pub fn sort_by_tags(&mut self) {
        self.0.sort_by(|a, b| {
            a.header
                .tags
                .cmp(&b.header.tags)
                .then_with(|| a.header.name.cmp(&b.header.name))
        });
    }

    /// Sorts and dedupes the points of every series in parallel.
    pub fn sort_points(&mut self) {
        self.0.par_iter_mut().for_each(Series::sort_points);
    }

    pub fn size(&self) -> usize {
        self.iter().map(Series::size).sum()
    }
}

impl Deref for SeriesList {
    type Target = Vec<Series>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SeriesList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<Series>> for SeriesList {
    fn from(v: Vec<Series>) -> Self {
        SeriesList(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldDataType, FieldRole, Value};

    fn header(name: &str, tag: &str) -> SeriesHeader {
        let mut h = SeriesHeader {
            name: name.to_string(),
            query_statement: "SELECT value".to_string(),
            timestamp_field: FieldDefinition::new("time", FieldDataType::DateTimeUnixSecs, FieldRole::Timestamp, 0),
            value_fields: vec![FieldDefinition::new("value", FieldDataType::Float64, FieldRole::Value, 2)],
            ..Default::default()
        };
        h.tags.insert("host".to_string(), tag.to_string());
        h.calculate_size();
        h
    }

    fn series(name: &str, tag: &str, epochs: &[u64]) -> Series {
        let points = epochs
            .iter()
            .map(|&e| Point::new(e, vec![Value::Float(e as f64)]))
            .collect();
        Series::new(header(name, tag), points)
    }

    fn names(sl: &SeriesList) -> Vec<String> {
        sl.iter().map(|s| s.header.tags["host"].clone()).collect()
    }

    #[test]
    fn hash_is_structural() {
        let a = header("cpu", "a");
        let b = header("cpu", "a");
        assert_eq!(a.calculate_hash(), b.calculate_hash());
        assert_ne!(a.calculate_hash(), header("cpu", "b").calculate_hash());
        assert_ne!(a.calculate_hash(), header("mem", "a").calculate_hash());

        let mut retyped = header("cpu", "a");
        retyped.value_fields[0].data_type = FieldDataType::Int64;
        assert_ne!(a.calculate_hash(), retyped.calculate_hash());

        let mut resized = header("cpu", "a");
        resized.size = 0;
        assert_eq!(a.calculate_hash(), resized.calculate_hash());
    }

    #[test]
    fn hash_separates_adjacent_components() {
        let mut a = header("ab", "x");
        a.query_statement = "c".to_string();
        let mut b = header("a", "x");
        b.query_statement = "bc".to_string();
        assert_ne!(a.calculate_hash(), b.calculate_hash());
    }

    #[test]
    fn merge_appends_points_to_matching_series() {
        let mut sl = SeriesList(vec![series("cpu", "a", &[5, 10])]);
        let incoming = SeriesList(vec![series("cpu", "a", &[5, 15, 20])]);
        let stats = sl.merge(&incoming, true);
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.added, 0);
        let epochs: Vec<u64> = sl[0].points.iter().map(|p| p.epoch).collect();
        assert_eq!(epochs, vec![5, 10, 15, 20]);
        assert_eq!(sl[0].point_size, points_size(&sl[0].points));
    }

    #[test]
    fn merge_positions_new_series_after_their_predecessor() {
        let mut sl = SeriesList(vec![series("cpu", "a", &[1]), series("cpu", "c", &[1])]);
        let incoming = SeriesList(vec![
            series("cpu", "a", &[2]),
            series("cpu", "b", &[2]),
            series("cpu", "c", &[2]),
            series("cpu", "d", &[2]),
        ]);
        sl.merge(&incoming, true);
        assert_eq!(names(&sl), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn merge_places_leading_new_series_first() {
        let mut sl = SeriesList(vec![series("cpu", "b", &[1])]);
        let incoming = SeriesList(vec![series("cpu", "a", &[2]), series("cpu", "b", &[2])]);
        sl.merge(&incoming, true);
        assert_eq!(names(&sl), vec!["a", "b"]);

        let mut disjoint = SeriesList(vec![series("cpu", "b", &[1])]);
        disjoint.merge(&SeriesList(vec![series("cpu", "a", &[2])]), true);
        assert_eq!(names(&disjoint), vec!["b", "a"]);
    }

    #[test]
    fn merge_skips_duplicate_incoming_series() {
        let mut sl = SeriesList(vec![series("cpu", "a", &[1])]);
        let incoming = SeriesList(vec![series("cpu", "z", &[2]), series("cpu", "z", &[3])]);
        let stats = sl.merge(&incoming, true);
        assert_eq!(stats.added, 1);
        assert_eq!(sl.len(), 2);
        assert_eq!(sl[1].points.len(), 1);
    }

    #[test]
    fn equal_header_and_sort_by_tags() {
        let mut sl = SeriesList(vec![series("cpu", "b", &[1]), series("cpu", "a", &[1])]);
        let other = SeriesList(vec![series("cpu", "b", &[9]), series("cpu", "a", &[9])]);
        assert!(sl.equal_header(&other));
        sl.sort_by_tags();
        assert_eq!(names(&sl), vec!["a", "b"]);
        assert!(!sl.equal_header(&other));
    }

    #[test]
    fn sort_points_dedupes_in_parallel() {
        let mut sl = SeriesList(vec![series("cpu", "a", &[3, 1, 2, 1])]);
        sl.sort_points();
        let epochs: Vec<u64> = sl[0].points.iter().map(|p| p.epoch).collect();
        assert_eq!(epochs, vec![1, 2, 3]);
    }
}
