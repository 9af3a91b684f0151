//! Default cache encoding for [`DataSet`].
//!
//! A frame is `magic (8) | version u32 LE | crc32 u32 LE | payload len u32 LE |
//! payload`, where the payload is the bincode encoding of the persisted
//! field set. Any framing or checksum mismatch is reported as
//! [`TimeseriesError::Corruption`].

use crate::dataset::{DataSet, DataSetResult};
use crate::error::{Result, TimeseriesError};
use crate::extent_list::ExtentList;
use crate::pool;
use crate::telemetry::core_metrics;
use crate::timerange::TimeRangeQuery;
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const DATASET_MAGIC: &[u8; 8] = b"TSDSET01";
const DATASET_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 4;

#[derive(Serialize)]
struct PersistedRef<'a> {
    #[serde(rename = "status")]
    status: &'a str,
    #[serde(rename = "extent_list")]
    extent_list: &'a ExtentList,
    #[serde(rename = "results")]
    results: &'a [DataSetResult],
    #[serde(rename = "error")]
    error: &'a str,
    #[serde(rename = "errorType")]
    error_type: &'a str,
    #[serde(rename = "warnings")]
    warnings: &'a [String],
    #[serde(rename = "trq")]
    trq: Option<&'a TimeRangeQuery>,
    #[serde(rename = "volatile_extents")]
    volatile_extents: &'a ExtentList,
}

#[derive(Deserialize)]
struct Persisted {
    #[serde(rename = "status")]
    status: String,
    #[serde(rename = "extent_list")]
    extent_list: ExtentList,
    #[serde(rename = "results")]
    results: Vec<DataSetResult>,
    #[serde(rename = "error")]
    error: String,
    #[serde(rename = "errorType")]
    error_type: String,
    #[serde(rename = "warnings")]
    warnings: Vec<String>,
    #[serde(rename = "trq")]
    trq: Option<TimeRangeQuery>,
    #[serde(rename = "volatile_extents")]
    volatile_extents: ExtentList,
}

/// Encodes `ds` into a self-checking frame.
pub fn marshal_dataset(ds: &DataSet) -> Result<Vec<u8>> {
    let mut payload = pool::pools().buffer();
    {
        let _guard = ds.lock_updates();
        let record = PersistedRef {
            status: &ds.status,
            extent_list: &ds.extent_list,
            results: &ds.results,
            error: &ds.error,
            error_type: &ds.error_type,
            warnings: &ds.warnings,
            trq: ds.time_range_query.as_ref(),
            volatile_extents: &ds.volatile_extent_list,
        };
        bincode::serialize_into(&mut *payload, &record)?;
    }
    let len = u32::try_from(payload.len()).map_err(|_| {
        TimeseriesError::Serialization(format!("payload of {} bytes is too large", payload.len()))
    })?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(DATASET_MAGIC);
    out.extend_from_slice(&DATASET_VERSION.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    core_metrics::record_cache_marshal(out.len() as u64);
    Ok(out)
}

/// Decodes a frame produced by [`marshal_dataset`]. When the frame carries no
/// query, `trq` is attached instead.
pub fn unmarshal_dataset(bytes: &[u8], trq: Option<&TimeRangeQuery>) -> Result<DataSet> {
    if bytes.len() < HEADER_LEN {
        return Err(TimeseriesError::Corruption {
            details: format!("dataset frame truncated: {} bytes", bytes.len()),
        });
    }
    let (header, rest) = bytes.split_at(HEADER_LEN);
    let (expected_crc, len) = check_header(header)?;
    let payload = rest.get(..len).ok_or_else(|| TimeseriesError::Corruption {
        details: format!("dataset payload truncated: want {} have {}", len, rest.len()),
    })?;
    let mut hasher = Crc32::new();
    hasher.update(payload);
    if hasher.finalize() != expected_crc {
        return Err(TimeseriesError::Corruption {
            details: "dataset payload CRC mismatch".to_string(),
        });
    }

    let p: Persisted = bincode::deserialize(payload).map_err(|e| TimeseriesError::Corruption {
        details: format!("dataset payload decode failed: {}", e),
    })?;
    let mut ds = DataSet::new(p.trq.or_else(|| trq.cloned()));
    ds.status = p.status;
    ds.extent_list = p.extent_list;
    ds.results = p.results;
    ds.error = p.error;
    ds.error_type = p.error_type;
    ds.warnings = p.warnings;
    ds.volatile_extent_list = p.volatile_extents;
    Ok(ds)
}

/// Writes the encoding of `ds` to `w`.
pub fn write_dataset<W: Write>(ds: &DataSet, w: &mut W) -> Result<()> {
    let bytes = marshal_dataset(ds)?;
    w.write_all(&bytes)?;
    Ok(())
}

/// Reads one encoded dataset from `r`.
pub fn read_dataset<R: Read>(r: &mut R, trq: Option<&TimeRangeQuery>) -> Result<DataSet> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)?;
    let (_, len) = check_header(&header)?;
    let mut frame = header.to_vec();
    let read = r.take(len as u64).read_to_end(&mut frame)?;
    if read < len {
        return Err(TimeseriesError::Corruption {
            details: format!("dataset payload truncated: want {} have {}", len, read),
        });
    }
    unmarshal_dataset(&frame, trq)
}

/// Atomically writes the encoding of `ds` to `path` (temp file + rename).
pub fn save_dataset<P: AsRef<Path>>(ds: &DataSet, path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    let tmp_path = path.with_file_name(format!(".tmp_{}", file_name));

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    let mut w = BufWriter::new(file);
    write_dataset(ds, &mut w)?;
    w.flush()?;
    w.get_ref().sync_data()?;
    drop(w);

    fs::rename(&tmp_path, path)?;
    Ok(path.to_path_buf())
}

/// Loads a dataset written by [`save_dataset`].
pub fn load_dataset<P: AsRef<Path>>(path: P, trq: Option<&TimeRangeQuery>) -> Result<DataSet> {
    let mut reader = BufReader::new(File::open(path)?);
    read_dataset(&mut reader, trq)
}

/// Validates magic and version, returning the stored CRC and payload length.
fn check_header(header: &[u8]) -> Result<(u32, usize)> {
    if &header[0..8] != DATASET_MAGIC {
        return Err(TimeseriesError::Corruption {
            details: "bad dataset magic".to_string(),
        });
    }
    let version = read_u32(&header[8..12]);
    if version != DATASET_VERSION {
        return Err(TimeseriesError::Corruption {
            details: format!("unsupported dataset version {}", version),
        });
    }
    Ok((read_u32(&header[12..16]), read_u32(&header[16..20]) as usize))
}

fn read_u32(b: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&b[..4]);
    u32::from_le_bytes(buf)
}
