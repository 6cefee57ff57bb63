//! The sync engine: cache, derived intervals, counters and controller view.
//!
//! Every mutation of cached records goes through [`SyncEngine::merge_batch`]
//! or [`SyncEngine::ingest`], so the derived state never drifts from the
//! cache. The engine lives behind one lock; callers must not hold it across
//! a network request or a store write. Mutations hand back a
//! [`PendingWrite`] to flush once the lock is released.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::cache::{LocalCache, MergeOutcome, PendingWrite};
use crate::codec;
use crate::error::CacheError;
use crate::intervals::IntervalReconstructor;
use crate::models::{
    sort_file_index, ControllerState, InfoPayload, Interval, LiveStatus, Record, RemoteFile,
    RunningCounters,
};
use crate::stats::{StatsAggregator, StorageEstimate};

// ---

/// What happened to one batch handed to [`SyncEngine::ingest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub received: usize,
    pub inserted: usize,
    /// The batch landed before already known records, forcing a full replay.
    pub replayed: bool,
}

/// Outcome of a prune request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub matched: usize,
    pub removed: usize,
    pub confirmed: bool,
}

pub struct SyncEngine {
    cache: LocalCache,
    reconstructor: IntervalReconstructor,
    stats: StatsAggregator,
    controller: Option<ControllerState>,
    files: Vec<RemoteFile>,
    live: LiveStatus,
    connected: bool,
}

impl SyncEngine {
    // ---
    pub fn new(cache: LocalCache, close_on_boot: bool) -> Self {
        Self {
            cache,
            reconstructor: IntervalReconstructor::new(close_on_boot),
            stats: StatsAggregator::new(),
            controller: None,
            files: Vec::new(),
            live: LiveStatus::default(),
            connected: false,
        }
    }

    /// Load the persisted cache and derive everything from it.
    pub async fn load_cache(&mut self) -> usize {
        // ---
        let count = self.cache.load().await.len();
        self.rebuild();
        count
    }

    /// Merge records into the cache, leaving derived state alone. Returns the
    /// snapshot to write when anything was inserted.
    ///
    /// Used while history loading is in progress; call [`SyncEngine::rebuild`]
    /// once the load finishes.
    pub fn merge_batch(&mut self, records: Vec<Record>) -> (MergeOutcome, Option<PendingWrite>) {
        // ---
        let outcome = self.cache.merge_append(records);
        if outcome.inserted.is_empty() {
            return (outcome, None);
        }

        let pending = match self.cache.snapshot() {
            Ok(pending) => Some(pending),
            Err(e) => {
                tracing::warn!("Failed to serialize cache: {}", e);
                None
            }
        };
        (outcome, pending)
    }

    /// Snapshot the whole cache, e.g. for the shutdown flush.
    pub fn snapshot(&mut self) -> Result<PendingWrite, CacheError> {
        self.cache.snapshot()
    }

    /// Merge records and bring intervals and counters up to date.
    ///
    /// Batches that extend the stream are fed incrementally; a batch that
    /// lands before known records triggers a full replay.
    pub fn ingest(&mut self, records: Vec<Record>) -> (IngestSummary, Option<PendingWrite>) {
        // ---
        let received = records.len();
        let (outcome, pending) = self.merge_batch(records);

        let replayed = !outcome.appended;
        if replayed {
            self.rebuild();
        } else {
            self.reconstructor.feed(&outcome.inserted);
            outcome.inserted.iter().for_each(|r| self.stats.observe(r));
        }

        let summary = IngestSummary {
            received,
            inserted: outcome.inserted.len(),
            replayed,
        };
        (summary, pending)
    }

    /// Recompute intervals and counters from the full cache.
    pub fn rebuild(&mut self) {
        // ---
        self.reconstructor.reset();
        self.reconstructor.feed(self.cache.records());
        self.stats.recompute(self.cache.records());

        let counters = self.stats.counters();
        tracing::debug!(
            total_points = counters.total_points,
            event_points = counters.event_points,
            intervals = self.reconstructor.intervals().len(),
            "Derived state rebuilt"
        );
    }

    /// Adopt a freshly fetched controller state.
    pub fn apply_controller_state(&mut self, state: ControllerState) {
        // ---
        let mut files = state.files.clone();
        sort_file_index(&mut files);
        self.files = files;
        self.live.relay_on = state.relay_on;
        self.controller = Some(state);
    }

    /// Record the latest `/info` answer. Call after its records were merged.
    pub fn apply_live_info(&mut self, info: &InfoPayload) {
        // ---
        let sensor_count = self.sensor_count();
        let sensors = info
            .cur
            .as_ref()
            .and_then(|cur| codec::parse_value(cur).ok())
            .map(|record| record.readings.into_iter().take(sensor_count).collect())
            .unwrap_or_default();

        self.live = LiveStatus {
            relay_on: info.rel,
            uptime_secs: info.up,
            avg: info.avg,
            sensors,
            updated_at: Some(Utc::now()),
        };
    }

    /// Drop a deleted remote file from the index.
    pub fn remove_file(&mut self, name: &str) -> bool {
        // ---
        let before = self.files.len();
        self.files.retain(|f| f.name != name);
        before != self.files.len()
    }

    /// Delete (or with `confirm == false`, only count) cached records with
    /// `from <= timestamp < to`. A confirmed removal comes with the snapshot
    /// that makes it durable.
    pub fn prune_range(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        confirm: bool,
    ) -> Result<(PruneSummary, Option<PendingWrite>), CacheError> {
        // ---
        let in_range = |r: &Record| r.timestamp >= from && r.timestamp < to;
        let matched = self.cache.count_matching(in_range);

        let (removed, pending) = if confirm && matched > 0 {
            let pruned = self.cache.prune(in_range)?;
            self.rebuild();
            pruned
        } else {
            (0, None)
        };

        let summary = PruneSummary {
            from,
            to,
            matched,
            removed,
            confirmed: confirm,
        };
        Ok((summary, pending))
    }

    pub fn on_time_within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
        self.stats.on_time_within(self.reconstructor.intervals(), start, end)
    }

    pub fn storage_estimate(&self) -> Option<StorageEstimate> {
        // ---
        let state = self.controller.as_ref()?;
        Some(StorageEstimate::compute(
            state.fs,
            self.sensor_count(),
            state.conf.log,
            self.stats.counters(),
        ))
    }

    pub fn sensor_count(&self) -> usize {
        self.controller.as_ref().map_or(0, |s| s.sensors().len())
    }

    /// Poll period advertised by the controller, in seconds.
    pub fn read_interval_secs(&self) -> Option<u64> {
        self.controller.as_ref().map(|s| s.conf.read).filter(|r| *r > 0)
    }

    pub fn counters(&self) -> RunningCounters {
        self.stats.counters()
    }

    pub fn intervals(&self) -> &[Interval] {
        self.reconstructor.intervals()
    }

    /// The relay-on interval still running at the newest record, if any.
    pub fn ongoing_interval(&self) -> Option<&Interval> {
        self.reconstructor.ongoing()
    }

    pub fn boots(&self) -> &[DateTime<Utc>] {
        self.reconstructor.boots()
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn files(&self) -> &[RemoteFile] {
        &self.files
    }

    pub fn live(&self) -> &LiveStatus {
        &self.live
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        // ---
        if self.connected != connected {
            tracing::info!(connected, "Controller connection state changed");
        }
        self.connected = connected;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::cache::CacheStore;
    use crate::models::EventTag;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn rec(secs: i64, event: EventTag) -> Record {
        Record {
            timestamp: at(secs),
            readings: vec![100],
            event,
        }
    }

    fn engine() -> SyncEngine {
        SyncEngine::new(LocalCache::new(CacheStore::Memory), true)
    }

    #[test]
    fn test_incremental_ingest_matches_full_replay() {
        // ---
        use EventTag::*;
        let stream = vec![
            rec(60, Reading),
            rec(120, RelayOn),
            rec(180, Reading),
            rec(240, RelayOff),
            rec(300, RelayOn),
            rec(360, Reading),
        ];

        let mut incremental = engine();
        for chunk in stream.chunks(2) {
            let (summary, _) = incremental.ingest(chunk.to_vec());
            assert!(!summary.replayed);
        }

        let mut full = engine();
        let _ = full.ingest(stream);

        assert_eq!(incremental.intervals(), full.intervals());
        assert_eq!(incremental.counters(), full.counters());
        assert_eq!(full.counters().total_points, 6);
        assert_eq!(full.counters().event_points, 3);
    }

    #[test]
    fn test_out_of_order_batch_triggers_replay() {
        // ---
        let mut e = engine();
        let _ = e.ingest(vec![rec(300, EventTag::Reading)]);

        let (summary, _) = e.ingest(vec![rec(100, EventTag::RelayOn), rec(200, EventTag::RelayOff)]);

        assert!(summary.replayed);
        assert_eq!(e.intervals().len(), 1);
        assert_eq!(e.intervals()[0].to, Some(at(200)));
        assert!(e.ongoing_interval().is_none());

        let _ = e.ingest(vec![rec(400, EventTag::RelayOn)]);
        assert_eq!(e.ongoing_interval().map(|i| i.from), Some(at(400)));
        assert_eq!(e.counters().total_points, 3);
    }

    #[test]
    fn test_duplicates_are_not_counted_twice() {
        // ---
        let mut e = engine();
        let _ = e.ingest(vec![rec(60, EventTag::Reading), rec(120, EventTag::RelayOn)]);
        let (summary, pending) = e.ingest(vec![rec(120, EventTag::RelayOn)]);

        assert_eq!(summary.inserted, 0);
        assert!(pending.is_none());
        assert_eq!(e.counters().total_points, 2);
    }

    #[test]
    fn test_prune_dry_run_then_confirm() {
        // ---
        let mut e = engine();
        let _ = e.ingest((0..10).map(|i| rec(i * 60, EventTag::Reading)).collect());

        let (dry, pending) = e.prune_range(at(0), at(300), false).unwrap();
        assert_eq!(dry.matched, 5);
        assert_eq!(dry.removed, 0);
        assert!(pending.is_none());
        assert_eq!(e.cache().len(), 10);

        let (done, pending) = e.prune_range(at(0), at(300), true).unwrap();
        assert_eq!(done.removed, 5);
        assert!(pending.is_some());
        assert_eq!(e.cache().len(), 5);
        assert_eq!(e.counters().total_points, 5);
        // `to` is exclusive
        assert_eq!(e.cache().oldest_timestamp(), Some(at(300)));
    }

    #[tokio::test]
    async fn test_ingest_leaves_store_write_to_caller() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::File(dir.path().join("cache.json"));
        let mut e = SyncEngine::new(LocalCache::new(store.clone()), true);

        let (summary, pending) = e.ingest(vec![rec(60, EventTag::Reading), rec(120, EventTag::RelayOn)]);
        assert_eq!(summary.inserted, 2);
        assert_eq!(store.read().await.unwrap(), None);

        // the engine stays usable while the snapshot is in flight
        assert!(e.ongoing_interval().is_some());
        assert!(pending.unwrap().write().await.unwrap());
        assert_eq!(LocalCache::new(store).load().await.len(), 2);
    }

    #[test]
    fn test_live_info_keeps_configured_sensors() {
        // ---
        let mut e = engine();
        let state: ControllerState = serde_json::from_value(json!({
            "conf": {"read": 60, "log": 600},
            "fs": {"tot": 100, "used": 10},
            "sn": "28 aa 10,28 bb 10",
            "dt": [{"n": "21_1_10", "s": 1}, {"n": "21_1_0", "s": 1}],
            "rel": 0
        }))
        .unwrap();
        e.apply_controller_state(state);

        let info: InfoPayload = serde_json::from_value(json!({
            "cur": [2_403_151_245_i64, 215, 198, 40],
            "rel": 1,
            "up": 3600,
            "avg": 20.5
        }))
        .unwrap();
        e.apply_live_info(&info);

        assert_eq!(e.live().sensors, vec![215, 198]);
        assert_eq!(e.live().relay_on, Some(true));
        assert_eq!(e.read_interval_secs(), Some(60));
        assert_eq!(e.files()[0].name, "21_1_0");
        assert!(e.storage_estimate().is_some());

        assert!(e.remove_file("21_1_0"));
        assert!(!e.remove_file("21_1_0"));
    }
}
