//! Generic Tabular Parser: turns a matrix of string cells into a [`DataSet`].
//!
//! The parser knows nothing about any particular backend. A backend supplies
//! three callbacks: a field classifier (which columns are the timestamp,
//! tags, values), a type coercer (backend type name to [`FieldDataType`]) and
//! a timestamp parser (cell to nanosecond epoch).
//!
//! Parsing runs in two passes. The first pass assigns each data row to a
//! series (result name plus its non-empty tag values) and counts points per
//! series, so the second pass can populate exactly-sized point vectors.

use crate::dataset::{DataSet, DataSetResult};
use crate::error::{Result, TimeseriesError};
use crate::extent_list::ExtentList;
use crate::point::{points_size, Point};
use crate::series::{Series, SeriesHeader};
use crate::telemetry::core_metrics;
use crate::timerange::TimeRangeQuery;
use crate::types::{FieldDataType, FieldDefinition, SeriesFields, Tags, Timestamp, Value};
use crate::utils::safe_add_usize;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Classifies the columns of a matrix, typically from its header rows.
pub type FieldClassifier =
    Arc<dyn Fn(&[Vec<String>], Option<&TimeRangeQuery>) -> Result<SeriesFields> + Send + Sync>;
/// Maps a backend type name to the canonical data type.
pub type TypeCoercer = Arc<dyn Fn(&str) -> FieldDataType + Send + Sync>;
/// Parses a timestamp cell into nanoseconds since the epoch.
pub type TimestampParser = Arc<dyn Fn(&str, &FieldDefinition) -> Result<Timestamp> + Send + Sync>;

const KEY_PAIR_SEP: char = '\u{1f}';
const KEY_TAG_SEP: char = '\u{1e}';

/// Builds a [`TabularParser`]; every callback is required.
#[derive(Default)]
pub struct TabularParserBuilder {
    classifier: Option<FieldClassifier>,
    coercer: Option<TypeCoercer>,
    timestamp_parser: Option<TimestampParser>,
    first_data_row: i64,
}

impl TabularParserBuilder {
    pub fn field_classifier<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Vec<String>], Option<&TimeRangeQuery>) -> Result<SeriesFields> + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(f));
        self
    }

    pub fn type_coercer<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> FieldDataType + Send + Sync + 'static,
    {
        self.coercer = Some(Arc::new(f));
        self
    }

    pub fn timestamp_parser<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &FieldDefinition) -> Result<Timestamp> + Send + Sync + 'static,
    {
        self.timestamp_parser = Some(Arc::new(f));
        self
    }

    /// Index of the first data row; earlier rows are headers. Negative
    /// values are clamped to zero.
    pub fn first_data_row(mut self, row: i64) -> Self {
        self.first_data_row = row;
        self
    }

    pub fn build(self) -> Result<TabularParser> {
        let classifier = self.classifier.ok_or(TimeseriesError::InvalidFieldClassifier)?;
        let coercer = self.coercer.ok_or(TimeseriesError::InvalidTypeCoercer)?;
        let timestamp_parser = self
            .timestamp_parser
            .ok_or(TimeseriesError::InvalidTimestampParser)?;
        Ok(TabularParser {
            classifier,
            coercer,
            timestamp_parser,
            first_data_row: usize::try_from(self.first_data_row.max(0)).unwrap_or(usize::MAX),
        })
    }
}

/// A reusable, thread-safe matrix-to-dataset parser.
#[derive(Clone)]
pub struct TabularParser {
    classifier: FieldClassifier,
    coercer: TypeCoercer,
    timestamp_parser: TimestampParser,
    first_data_row: usize,
}

impl fmt::Debug for TabularParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabularParser")
            .field("first_data_row", &self.first_data_row)
            .finish_non_exhaustive()
    }
}

/// First-pass bookkeeping for one series.
struct SeriesPlan {
    result: usize,
    tags: Tags,
    points: usize,
}

impl TabularParser {
    pub fn builder() -> TabularParserBuilder {
        TabularParserBuilder::default()
    }

    pub fn first_data_row(&self) -> usize {
        self.first_data_row
    }

    /// Parses `rows` into a dataset covering `trq`'s extent.
    ///
    /// Rows whose width differs from the first row, and rows whose timestamp
    /// fails to parse, are skipped with a log entry. Empty value cells become
    /// [`Value::Null`].
    pub fn to_dataset(&self, rows: &[Vec<String>], trq: Option<&TimeRangeQuery>) -> Result<DataSet> {
        let trq = trq.ok_or(TimeseriesError::NoTimerangeQuery)?;
        let started = Instant::now();

        let mut fields = (self.classifier)(rows, Some(trq))?;
        let ts_pos = fields
            .timestamp
            .output_position
            .ok_or(TimeseriesError::InvalidBody)?;
        self.coerce_types(&mut fields);

        let width = rows.first().map(Vec::len).unwrap_or(0);
        let mut skipped = 0u64;

        // pass 1: assign rows to series and count
        let mut result_names: Vec<String> = Vec::new();
        let mut result_index: HashMap<String, usize> = HashMap::new();
        let mut series_index: HashMap<String, usize> = HashMap::new();
        let mut plans: Vec<SeriesPlan> = Vec::new();
        let mut row_series: Vec<Option<usize>> = vec![None; rows.len()];

        for (i, row) in rows.iter().enumerate().skip(self.first_data_row) {
            if row.len() != width {
                debug!(row = i, width = row.len(), expected = width, "skipping mis-sized row");
                skipped += 1;
                continue;
            }
            let result_name = fields
                .result_name_column
                .and_then(|c| row.get(c))
                .cloned()
                .unwrap_or_default();
            let (key, tags) = series_key(row, &fields.tags, &result_name);
            let idx = match series_index.get(&key) {
                Some(&idx) => idx,
                None => {
                    let result = *result_index.entry(result_name.clone()).or_insert_with(|| {
                        result_names.push(result_name.clone());
                        result_names.len() - 1
                    });
                    plans.push(SeriesPlan {
                        result,
                        tags,
                        points: 0,
                    });
                    series_index.insert(key, plans.len() - 1);
                    plans.len() - 1
                }
            };
            plans[idx].points += 1;
            row_series[i] = Some(idx);
        }

        // allocate exactly-sized results and series
        let mut results: Vec<DataSetResult> = result_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| DataSetResult {
                statement_id: i32::try_from(i).unwrap_or(i32::MAX),
                name,
                ..Default::default()
            })
            .collect();
        let mut locate: Vec<(usize, usize)> = Vec::with_capacity(plans.len());
        for plan in plans {
            let result = &mut results[plan.result];
            let mut header = SeriesHeader {
                name: result.name.clone(),
                tags: plan.tags,
                timestamp_field: fields.timestamp.clone(),
                tag_fields: fields.tags.clone(),
                value_fields: fields.values.clone(),
                query_statement: trq.statement.clone(),
                size: 0,
            };
            header.calculate_size();
            locate.push((plan.result, result.series_list.len()));
            result.series_list.push(Series {
                header,
                points: Vec::with_capacity(plan.points),
                point_size: points_size(&[]),
            });
        }

        // pass 2: populate
        let mut data_rows = 0u64;
        for (i, row) in rows.iter().enumerate() {
            let Some(plan) = row_series[i] else {
                continue;
            };
            data_rows += 1;
            let raw_ts = cell(row, Some(ts_pos));
            let epoch = match (self.timestamp_parser)(raw_ts, &fields.timestamp) {
                Ok(epoch) => epoch,
                Err(err) => {
                    warn!(row = i, error = %err, "failed to parse timestamp");
                    skipped += 1;
                    continue;
                }
            };
            let point = build_point(i, epoch, row, &fields.values);
            let (ri, si) = locate[plan];
            let series = &mut results[ri].series_list[si];
            let (total, _) = safe_add_usize(series.point_size, point.size);
            series.point_size = total;
            series.points.push(point);
        }

        for r in &mut results {
            r.series_list.retain(|s| !s.points.is_empty());
            r.series_list
                .par_iter_mut()
                .filter(|s| !s.points.windows(2).all(|w| w[0].epoch < w[1].epoch))
                .for_each(Series::sort_points);
        }

        core_metrics::record_parse(started.elapsed(), data_rows, skipped);

        let mut ds = DataSet::new(Some(trq.clone()));
        ds.extent_list = ExtentList(vec![trq.extent]);
        ds.results = results;
        Ok(ds)
    }

    /// Resolves every field still typed `Unknown` through the type coercer.
    fn coerce_types(&self, fields: &mut SeriesFields) {
        let all = std::iter::once(&mut fields.timestamp)
            .chain(fields.tags.iter_mut())
            .chain(fields.values.iter_mut())
            .chain(fields.untracked.iter_mut());
        for fd in all {
            if fd.data_type == FieldDataType::Unknown {
                fd.data_type = (self.coercer)(&fd.provider_type);
            }
        }
    }
}

/// Returns the cell at `pos`, or `""` when absent.
fn cell(row: &[String], pos: Option<usize>) -> &str {
    pos.and_then(|p| row.get(p)).map(String::as_str).unwrap_or("")
}

/// Series key for a row: its result name plus every non-empty tag value.
fn series_key(row: &[String], tag_fields: &[FieldDefinition], result_name: &str) -> (String, Tags) {
    let mut key = String::with_capacity(result_name.len() + 16 * tag_fields.len());
    key.push_str(result_name);
    key.push('.');
    let mut tags = Tags::new();
    for fd in tag_fields {
        let value = cell(row, fd.output_position);
        if fd.name.is_empty() || value.is_empty() {
            continue;
        }
        key.push_str(&fd.name);
        key.push(KEY_PAIR_SEP);
        key.push_str(value);
        key.push(KEY_TAG_SEP);
        tags.insert(fd.name.clone(), value.to_string());
    }
    (key, tags)
}

fn build_point(
    row_idx: usize,
    epoch: Timestamp,
    row: &[String],
    value_fields: &[FieldDefinition],
) -> Point {
    let mut size = 8usize;
    let values = value_fields
        .iter()
        .map(|fd| {
            let raw = cell(row, fd.output_position);
            if raw.is_empty() {
                return Value::Null;
            }
            let (value, sz) = Value::parse(raw, fd.data_type);
            if matches!(value, Value::Null)
                && !matches!(fd.data_type, FieldDataType::Unknown | FieldDataType::Null)
            {
                debug!(row = row_idx, field = %fd.name, cell = raw, "unparseable value cell");
            }
            let (next, _) = safe_add_usize(size, sz);
            size = next;
            value
        })
        .collect();
    Point {
        epoch,
        size,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldRole;
    use crate::utils::SECOND;
    use std::time::Duration;

    fn classifier(_: &[Vec<String>], _: Option<&TimeRangeQuery>) -> Result<SeriesFields> {
        let mut ts = FieldDefinition::new("time", FieldDataType::Unknown, FieldRole::Timestamp, 0);
        ts.provider_type = "unix".to_string();
        let mut value = FieldDefinition::new("value", FieldDataType::Unknown, FieldRole::Value, 2);
        value.provider_type = "double".to_string();
        Ok(SeriesFields {
            timestamp: ts,
            tags: vec![FieldDefinition::new("host", FieldDataType::String, FieldRole::Tag, 1)],
            values: vec![value],
            ..Default::default()
        })
    }

    fn coercer(t: &str) -> FieldDataType {
        match t {
            "double" => FieldDataType::Float64,
            "unix" => FieldDataType::DateTimeUnixSecs,
            _ => FieldDataType::String,
        }
    }

    fn ts_parser(s: &str, _: &FieldDefinition) -> Result<Timestamp> {
        s.parse::<u64>()
            .map(|v| v * SECOND)
            .map_err(|e| TimeseriesError::InvalidTimestamp {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }

    fn parser() -> TabularParser {
        TabularParser::builder()
            .field_classifier(classifier)
            .type_coercer(coercer)
            .timestamp_parser(ts_parser)
            .first_data_row(1)
            .build()
            .unwrap()
    }

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn builder_requires_every_callback() {
        let err = TabularParser::builder()
            .type_coercer(coercer)
            .timestamp_parser(ts_parser)
            .build()
            .unwrap_err();
        assert!(matches!(err, TimeseriesError::InvalidFieldClassifier));

        let err = TabularParser::builder()
            .field_classifier(classifier)
            .timestamp_parser(ts_parser)
            .build()
            .unwrap_err();
        assert!(matches!(err, TimeseriesError::InvalidTypeCoercer));

        let err = TabularParser::builder()
            .field_classifier(classifier)
            .type_coercer(coercer)
            .build()
            .unwrap_err();
        assert!(matches!(err, TimeseriesError::InvalidTimestampParser));
    }

    #[test]
    fn negative_first_row_is_clamped() {
        let p = TabularParser::builder()
            .field_classifier(classifier)
            .type_coercer(coercer)
            .timestamp_parser(ts_parser)
            .first_data_row(-4)
            .build()
            .unwrap();
        assert_eq!(p.first_data_row(), 0);
    }

    #[test]
    fn missing_query_is_rejected() {
        let err = parser().to_dataset(&[], None).unwrap_err();
        assert!(matches!(err, TimeseriesError::NoTimerangeQuery));
    }

    #[test]
    fn coerces_unknown_types_and_sorts_points() {
        let trq = TimeRangeQuery::new("q", 0, 100 * SECOND, Duration::from_secs(10));
        let m = rows(&[
            &["time", "host", "value"],
            &["20", "a", "2.5"],
            &["10", "a", "1.5"],
        ]);
        let ds = parser().to_dataset(&m, Some(&trq)).unwrap();
        let s = &ds.results[0].series_list[0];
        assert_eq!(s.header.value_fields[0].data_type, FieldDataType::Float64);
        assert_eq!(s.header.timestamp_field.data_type, FieldDataType::DateTimeUnixSecs);
        let epochs: Vec<u64> = s.points.iter().map(|p| p.epoch).collect();
        assert_eq!(epochs, vec![10 * SECOND, 20 * SECOND]);
        assert_eq!(s.points[0].values, vec![Value::Float(1.5)]);
        assert_eq!(s.point_size, points_size(&s.points));
    }

    #[test]
    fn series_key_skips_empty_tags() {
        let tag_fields = vec![
            FieldDefinition::new("host", FieldDataType::String, FieldRole::Tag, 0),
            FieldDefinition::new("dc", FieldDataType::String, FieldRole::Tag, 1),
        ];
        let row: Vec<String> = vec!["a".into(), "".into()];
        let (key, tags) = series_key(&row, &tag_fields, "r");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["host"], "a");
        assert!(key.starts_with("r."));
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unparseable_value_is_null_and_logged() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let trq = TimeRangeQuery::new("q", 0, 100 * SECOND, Duration::from_secs(10));
        let m = rows(&[
            &["time", "host", "value"],
            &["10", "a", "abc"],
            &["20", "a", "2.5"],
        ]);
        let ds = tracing::subscriber::with_default(subscriber, || {
            parser().to_dataset(&m, Some(&trq)).unwrap()
        });

        let s = &ds.results[0].series_list[0];
        assert_eq!(s.points.len(), 2);
        assert_eq!(s.points[0].values, vec![Value::Null]);

        let logged = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("unparseable value cell"), "log: {}", logged);
        assert!(logged.contains("abc"), "log: {}", logged);
    }
}
