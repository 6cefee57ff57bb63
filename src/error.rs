//! Error taxonomy for the sync engine.
//!
//! Per-line and per-fetch failures are contained close to where they happen:
//! a [`RecordFormatError`] skips one line, an [`AggregatedError`] is only
//! produced after the retry budget is spent, and a corrupt cache is reported
//! as a [`CacheError::Corrupt`] warning before the cache resets to empty.
//! Loss of the controller connection is a health flag on the engine, not an
//! error value.

use thiserror::Error;

// ---

/// One raw record (a line of a device log file) could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordFormatError {
    #[error("record is not a JSON array")]
    NotAnArray,

    #[error("record is empty")]
    Empty,

    #[error("timestamp field is not an integer: {0}")]
    BadTimestamp(String),

    #[error("reading #{index} is not an integer: {value}")]
    BadReading { index: usize, value: String },

    #[error("unknown event tag {0:?}")]
    UnknownTag(String),
}

/// Every attempt of a retried operation failed.
///
/// The message lists each distinct failure in first-seen order, with an
/// occurrence count for repeats, e.g. `timeout(x3); refused(x2)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AggregatedError {
    pub message: String,
    pub attempts: u32,
}

/// Failures of the persistent cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache database query failed: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("cache payload is corrupt: {0}")]
    Corrupt(String),
}

/// Failures talking to the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller base URL is not configured")]
    NoBaseUrl,

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("controller answered {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("controller payload could not be parsed: {0}")]
    Payload(String),
}

/// A poll period that is not a positive number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("read interval must be a positive number of seconds, got {0}")]
pub struct InvalidReadInterval(pub i64);
