//! `relaysync`: keeps a local, deduplicated copy of a relay controller's
//! telemetry log and derives relay-on intervals and on-time statistics.
//!
//! This crate root is the module gateway (EMBP): sibling modules reach each
//! other through the re-exports below, and `main.rs` only wires the service
//! together.

pub mod cache;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod history;
pub mod intervals;
pub mod models;
pub mod poller;
pub mod routes;
pub mod schema;
pub mod service;
pub mod stats;

pub use cache::{month_range, CacheStore, LocalCache, PendingWrite};
pub use config::Config;
pub use engine::{IngestSummary, PruneSummary, SyncEngine};
pub use error::{AggregatedError, CacheError, ControllerError, InvalidReadInterval, RecordFormatError};
pub use fetch::{Controller, FetchMode, HttpController, RetryingFetcher};
pub use history::{HistoryLoader, LoadOutcome, LoadReport};
pub use models::{EventTag, Interval, LiveStatus, Record, RemoteFile, RunningCounters};
pub use service::{ServiceSettings, SyncService};
pub use stats::StorageEstimate;
