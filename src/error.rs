use thiserror::Error;

/// Error type for the time-series cache core.
#[derive(Error, Debug)]
pub enum TimeseriesError {
    /// The upstream body could not be turned into a dataset (e.g. no timestamp column).
    #[error("invalid body")]
    InvalidBody,

    #[error("no time range query")]
    NoTimerangeQuery,

    /// A `Timeseries` value was not of the expected concrete type.
    #[error("unknown format")]
    UnknownFormat,

    #[error("invalid field classifier function")]
    InvalidFieldClassifier,

    #[error("invalid type coercer function")]
    InvalidTypeCoercer,

    #[error("invalid timestamp parser function")]
    InvalidTimestampParser,

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {details}")]
    Corruption { details: String },
}

impl From<bincode::Error> for TimeseriesError {
    fn from(err: bincode::Error) -> Self {
        TimeseriesError::Serialization(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TimeseriesError>;
