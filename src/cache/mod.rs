//! Ordered, deduplicated local record cache.
//!
//! Records are kept sorted by timestamp; ties keep insertion order. Identity
//! is `(timestamp, event)`, so re-adding a known record is a no-op. The whole
//! set is flushed to the [`CacheStore`] after each mutating batch.
//!
//! A flush is split in two: [`LocalCache::snapshot`] serializes the set while
//! the caller still holds the cache, and [`PendingWrite::write`] sends it to
//! the store afterwards. Writes are ordered by snapshot generation, so a
//! slow older snapshot never overwrites a newer one.

mod store;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::codec;
use crate::error::CacheError;
use crate::models::{Record, RecordKey};

pub use store::{CacheStore, CACHE_KEY};

// ---

/// Result of one merge-append batch.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Newly inserted records, in timestamp order.
    pub inserted: Vec<Record>,
    /// True when every inserted record sits at or after the previous newest
    /// record, i.e. the batch extended the stream instead of rewriting it.
    pub appended: bool,
}

/// A serialized copy of the cache waiting to be written.
#[derive(Debug)]
#[must_use = "a snapshot does nothing until it is written"]
pub struct PendingWrite {
    store: CacheStore,
    payload: String,
    records: usize,
    generation: u64,
    written: Arc<Mutex<u64>>,
}

impl PendingWrite {
    // ---
    /// Write the snapshot to the store. Returns `false` when a newer snapshot
    /// already reached the store and this one was dropped.
    pub async fn write(self) -> Result<bool, CacheError> {
        // ---
        let mut written = self.written.lock().await;
        if *written >= self.generation {
            tracing::debug!(generation = self.generation, "Skipped superseded cache snapshot");
            return Ok(false);
        }

        self.store.write(&self.payload).await?;
        *written = self.generation;
        tracing::debug!("Persisted {} records ({} bytes)", self.records, self.payload.len());
        Ok(true)
    }

    pub fn records(&self) -> usize {
        self.records
    }
}

/// The local record cache.
#[derive(Debug)]
pub struct LocalCache {
    records: Vec<Record>,
    keys: HashSet<RecordKey>,
    store: CacheStore,
    generation: u64,
    written: Arc<Mutex<u64>>,
}

impl LocalCache {
    // ---
    /// An empty cache backed by `store`. Call [`LocalCache::load`] to fill it.
    pub fn new(store: CacheStore) -> Self {
        Self {
            records: Vec::new(),
            keys: HashSet::new(),
            store,
            generation: 0,
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Replace the in-memory set with the persisted one.
    ///
    /// Never fails: an unreadable or corrupt payload is reported and the
    /// cache starts empty. Malformed individual records are skipped.
    pub async fn load(&mut self) -> &[Record] {
        // ---
        self.records.clear();
        self.keys.clear();

        let payload = match self.store.read().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::info!("No persisted cache in {}, starting empty", self.store.describe());
                return &self.records;
            }
            Err(e) => {
                tracing::warn!("Cache unreadable, starting empty: {}", e);
                return &self.records;
            }
        };

        let lines: Vec<Value> = match serde_json::from_str(&payload) {
            Ok(lines) => lines,
            Err(e) => {
                let err = CacheError::Corrupt(e.to_string());
                tracing::warn!("{}; cache considered empty", err);
                return &self.records;
            }
        };

        let (records, rejected) = codec::parse_lines(&lines);
        if !rejected.is_empty() {
            tracing::warn!("Dropped {} malformed cached records", rejected.len());
        }
        self.merge_append(records);

        tracing::info!(
            "Loaded {} cached records from {}",
            self.records.len(),
            self.store.describe()
        );
        &self.records
    }

    /// Insert records by identity, keeping timestamp order. Known identities
    /// are ignored.
    pub fn merge_append(&mut self, incoming: impl IntoIterator<Item = Record>) -> MergeOutcome {
        // ---
        let newest = self.newest_timestamp();
        let mut inserted: Vec<Record> = incoming
            .into_iter()
            .filter(|record| self.keys.insert(record.key()))
            .collect();

        if inserted.is_empty() {
            return MergeOutcome {
                inserted,
                appended: true,
            };
        }

        inserted.sort_by_key(|r| r.timestamp);
        let appended = newest.map_or(true, |newest| inserted[0].timestamp >= newest);

        self.records.extend(inserted.iter().cloned());
        if !appended {
            // Stable: existing records stay ahead of new ones at equal timestamps.
            self.records.sort_by_key(|r| r.timestamp);
        }

        MergeOutcome { inserted, appended }
    }

    /// Records matching `predicate`, in order. Non-destructive.
    pub fn range_filter(&self, predicate: impl Fn(&Record) -> bool) -> Vec<Record> {
        self.records.iter().filter(|r| predicate(r)).cloned().collect()
    }

    /// Dry run of [`LocalCache::prune`].
    pub fn count_matching(&self, predicate: impl Fn(&Record) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(r)).count()
    }

    /// Remove every record matching `predicate`. The returned snapshot must
    /// be written for the removal to survive a restart.
    pub fn prune(
        &mut self,
        predicate: impl Fn(&Record) -> bool,
    ) -> Result<(usize, Option<PendingWrite>), CacheError> {
        // ---
        let before = self.records.len();
        self.records.retain(|r| !predicate(r));
        let removed = before - self.records.len();

        let pending = if removed > 0 {
            self.keys = self.records.iter().map(Record::key).collect();
            Some(self.snapshot()?)
        } else {
            None
        };

        tracing::info!("Pruned {} cached records", removed);
        Ok((removed, pending))
    }

    /// Serialize the full ordered set for a later [`PendingWrite::write`].
    pub fn snapshot(&mut self) -> Result<PendingWrite, CacheError> {
        // ---
        let raw: Vec<_> = self.records.iter().map(codec::serialize).collect();
        let payload =
            serde_json::to_string(&raw).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        self.generation += 1;
        Ok(PendingWrite {
            store: self.store.clone(),
            payload,
            records: raw.len(),
            generation: self.generation,
            written: Arc::clone(&self.written),
        })
    }

    /// Write the full ordered set to the backing store.
    pub async fn persist(&mut self) -> Result<(), CacheError> {
        self.snapshot()?.write().await.map(|_| ())
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.last().map(|r| r.timestamp)
    }

    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.first().map(|r| r.timestamp)
    }
}

/// `[from, to)` covering whole UTC months, from the first day of
/// `month_from/year_from` to the first day after `month_to/year_to`.
///
/// Returns `None` for an invalid month or an inverted range.
pub fn month_range(
    year_from: i32,
    month_from: u32,
    year_to: i32,
    month_to: u32,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    // ---
    let from = NaiveDate::from_ymd_opt(year_from, month_from, 1)?;
    let last = NaiveDate::from_ymd_opt(year_to, month_to, 1)?;
    let to = last.checked_add_months(chrono::Months::new(1))?;

    if to <= from {
        return None;
    }

    Some((
        from.and_hms_opt(0, 0, 0)?.and_utc(),
        to.and_hms_opt(0, 0, 0)?.and_utc(),
    ))
}
