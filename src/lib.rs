#![doc = include_str!("../README.md")]
// Declare modules
pub mod config;
pub mod crop;
pub mod dataset;
pub mod error;
pub mod extent;
pub mod extent_list;
pub mod merge;
pub mod persistence;
pub mod point;
pub mod pool;
pub mod series;
pub mod tabular;
pub mod telemetry;
pub mod timerange;
pub mod timeseries;
pub mod types;
pub mod utils;

/// Tunables for pools and size cropping.
pub use crate::config::{CoreConfig, PoolConfig};
/// The canonical in-memory time-series container.
pub use crate::dataset::{DataSet, DataSetResult, SeriesLookupKey};
/// Error type for cache-core operations.
pub use crate::error::TimeseriesError;
/// A closed time interval with a last-used marker.
pub use crate::extent::Extent;
/// Interval algebra over lists of extents.
pub use crate::extent_list::{ExtentList, ExtentListLRU, SplicePolicy};
/// Default cache encoding.
pub use crate::persistence::{marshal_dataset, unmarshal_dataset};
/// A single timestamp and its values.
pub use crate::point::Point;
/// Series identity and ordering.
pub use crate::series::{Series, SeriesHash, SeriesHeader, SeriesList};
/// Backend-agnostic row-matrix ingestion.
pub use crate::tabular::{TabularParser, TabularParserBuilder};
/// The query context a dataset was fetched for.
pub use crate::timerange::{BackfillTolerance, TimeRangeQuery};
/// Capability set and codec bundle consumed by a cache layer.
pub use crate::timeseries::{Modeler, Timeseries};
/// Field metadata and scalar values.
pub use crate::types::{FieldDataType, FieldDefinition, FieldRole, SeriesFields, Tags, Timestamp, Value};
