//! The capability set a cache layer uses to manage cached time series, and
//! the per-backend codec bundle that produces them.

use crate::dataset::DataSet;
use crate::error::{Result, TimeseriesError};
use crate::extent::Extent;
use crate::extent_list::ExtentList;
use crate::persistence;
use crate::timerange::TimeRangeQuery;
use crate::types::Timestamp;
use std::any::Any;
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::warn;

/// Operations a cache layer performs on a cached time series without
/// knowing its concrete type.
pub trait Timeseries: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn set_extents(&mut self, el: ExtentList);
    fn extents(&self) -> &ExtentList;
    fn volatile_extents(&self) -> &ExtentList;
    fn set_volatile_extents(&mut self, el: ExtentList);
    /// Unique timestamps across all series.
    fn timestamp_count(&self) -> u64;
    fn step(&self) -> Duration;
    /// Merges `others` into `self`. Values of a different concrete type are skipped.
    fn merge(&mut self, sort: bool, others: &[&dyn Timeseries]);
    fn sort(&mut self);
    fn clone_boxed(&self) -> Box<dyn Timeseries>;
    fn cropped_clone(&self, e: &Extent) -> Box<dyn Timeseries>;
    fn crop_to_range(&mut self, e: &Extent);
    fn crop_to_size(&mut self, max_points: usize, now: Timestamp, used: &Extent);
    fn series_count(&self) -> usize;
    fn value_count(&self) -> usize;
    /// Approximate memory utilization in bytes.
    fn size(&self) -> usize;
    fn set_time_range_query(&mut self, trq: Option<TimeRangeQuery>);
}

impl Clone for Box<dyn Timeseries> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Downcasts a trait object to the core dataset type.
pub fn as_dataset(ts: &dyn Timeseries) -> Result<&DataSet> {
    ts.as_any()
        .downcast_ref::<DataSet>()
        .ok_or(TimeseriesError::UnknownFormat)
}

impl Timeseries for DataSet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn set_extents(&mut self, el: ExtentList) {
        DataSet::set_extents(self, el);
    }

    fn extents(&self) -> &ExtentList {
        &self.extent_list
    }

    fn volatile_extents(&self) -> &ExtentList {
        &self.volatile_extent_list
    }

    fn set_volatile_extents(&mut self, el: ExtentList) {
        DataSet::set_volatile_extents(self, el);
    }

    fn timestamp_count(&self) -> u64 {
        DataSet::timestamp_count(self)
    }

    fn step(&self) -> Duration {
        DataSet::step(self)
    }

    fn merge(&mut self, sort: bool, others: &[&dyn Timeseries]) {
        let datasets: Vec<&DataSet> = others
            .iter()
            .filter_map(|ts| match as_dataset(*ts) {
                Ok(ds) => Some(ds),
                Err(_) => {
                    warn!("skipping merge input that is not a DataSet");
                    None
                }
            })
            .collect();
        DataSet::merge(self, sort, &datasets);
    }

    fn sort(&mut self) {
        DataSet::sort(self);
    }

    fn clone_boxed(&self) -> Box<dyn Timeseries> {
        Box::new(self.clone())
    }

    fn cropped_clone(&self, e: &Extent) -> Box<dyn Timeseries> {
        Box::new(DataSet::cropped_clone(self, e))
    }

    fn crop_to_range(&mut self, e: &Extent) {
        DataSet::crop_to_range(self, e);
    }

    fn crop_to_size(&mut self, max_points: usize, now: Timestamp, used: &Extent) {
        DataSet::crop_to_size(self, max_points, now, used);
    }

    fn series_count(&self) -> usize {
        DataSet::series_count(self)
    }

    fn value_count(&self) -> usize {
        DataSet::value_count(self)
    }

    fn size(&self) -> usize {
        DataSet::size(self)
    }

    fn set_time_range_query(&mut self, trq: Option<TimeRangeQuery>) {
        DataSet::set_time_range_query(self, trq);
    }
}

/// Decodes a backend wire body.
pub type WireUnmarshalFn = fn(&[u8], Option<&TimeRangeQuery>) -> Result<Box<dyn Timeseries>>;
/// Decodes a backend wire body from a stream.
pub type WireUnmarshalReaderFn =
    fn(&mut dyn Read, Option<&TimeRangeQuery>) -> Result<Box<dyn Timeseries>>;
/// Encodes a time series in a backend's wire format; `status` is the HTTP status to report.
pub type WireMarshalFn = fn(&dyn Timeseries, u16) -> Result<Vec<u8>>;
/// Encodes a time series in a backend's wire format onto a stream.
pub type WireMarshalWriterFn = fn(&dyn Timeseries, u16, &mut dyn Write) -> Result<()>;
/// Encodes a time series for the cache.
pub type CacheMarshalFn = fn(&dyn Timeseries) -> Result<Vec<u8>>;
/// Decodes a cached time series.
pub type CacheUnmarshalFn = fn(&[u8], Option<&TimeRangeQuery>) -> Result<Box<dyn Timeseries>>;

/// The codec functions a backend supplies to the cache layer.
#[derive(Clone, Copy)]
pub struct Modeler {
    pub wire_unmarshal: WireUnmarshalFn,
    pub wire_unmarshal_reader: WireUnmarshalReaderFn,
    pub wire_marshal: WireMarshalFn,
    pub wire_marshal_writer: WireMarshalWriterFn,
    pub cache_marshal: CacheMarshalFn,
    pub cache_unmarshal: CacheUnmarshalFn,
}

impl fmt::Debug for Modeler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modeler").finish_non_exhaustive()
    }
}

impl Modeler {
    /// A modeler using the given wire codecs and the default cache encoding.
    pub fn new(
        wire_unmarshal: WireUnmarshalFn,
        wire_unmarshal_reader: WireUnmarshalReaderFn,
        wire_marshal: WireMarshalFn,
        wire_marshal_writer: WireMarshalWriterFn,
    ) -> Self {
        Self {
            wire_unmarshal,
            wire_unmarshal_reader,
            wire_marshal,
            wire_marshal_writer,
            cache_marshal: default_cache_marshal,
            cache_unmarshal: default_cache_unmarshal,
        }
    }
}

/// Encodes a [`DataSet`] with [`persistence::marshal_dataset`]; any other
/// concrete type is `UnknownFormat`.
pub fn default_cache_marshal(ts: &dyn Timeseries) -> Result<Vec<u8>> {
    persistence::marshal_dataset(as_dataset(ts)?)
}

pub fn default_cache_unmarshal(
    bytes: &[u8],
    trq: Option<&TimeRangeQuery>,
) -> Result<Box<dyn Timeseries>> {
    Ok(Box::new(persistence::unmarshal_dataset(bytes, trq)?))
}
