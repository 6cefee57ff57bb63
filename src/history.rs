//! Cascade loading of controller log files into the local cache.
//!
//! Walks the remote file index from the newest file backwards, one file at a
//! time, until a file reaches back to data the cache already holds. Files
//! are fetched strictly in sequence: whether to fetch the next one depends
//! on the content of the current one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::codec;
use crate::engine::SyncEngine;
use crate::error::AggregatedError;
use crate::fetch::{Controller, RetryingFetcher};
use crate::models::RemoteFile;

// ---

/// Attempts per file before the load session fails.
pub const FILE_FETCH_ATTEMPTS: u32 = 5;

/// Where a load session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum LoadOutcome {
    Done,
    /// A file could not be fetched; data merged before it is kept.
    Failed(String),
}

/// Summary of one load session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub outcome: LoadOutcome,
    /// Names of files fetched successfully, newest first.
    pub fetched: Vec<String>,
    pub inserted: usize,
    pub skipped_lines: usize,
}

enum Step {
    Fetch(usize),
    Done,
    Failed(AggregatedError),
}

/// Runs cascade load sessions.
#[derive(Debug, Clone, Copy)]
pub struct HistoryLoader {
    fetcher: RetryingFetcher,
}

impl Default for HistoryLoader {
    fn default() -> Self {
        Self::new(FILE_FETCH_ATTEMPTS)
    }
}

impl HistoryLoader {
    // ---
    pub fn new(attempts: u32) -> Self {
        Self {
            fetcher: RetryingFetcher::new(attempts),
        }
    }

    /// Run one load session against the engine's current file index.
    ///
    /// Derived state (intervals, counters) is rebuilt once at the end, for
    /// both outcomes.
    pub async fn run<C: Controller>(&self, controller: &C, engine: &Mutex<SyncEngine>) -> LoadReport {
        // ---
        let (files, local_newest): (Vec<RemoteFile>, Option<DateTime<Utc>>) = {
            let engine = engine.lock().await;
            (engine.files().to_vec(), engine.cache().newest_timestamp())
        };

        tracing::info!(
            files = files.len(),
            local_newest = ?local_newest,
            "Starting history load"
        );

        let mut report = LoadReport {
            outcome: LoadOutcome::Done,
            fetched: Vec::new(),
            inserted: 0,
            skipped_lines: 0,
        };

        let mut step = match files.len() {
            0 => Step::Done,
            n => Step::Fetch(n - 1),
        };

        while let Step::Fetch(index) = step {
            let file = &files[index];
            tracing::debug!("Loading {} ({} bytes) from controller", file.name, file.size_bytes);

            let fetched = self
                .fetcher
                .fetch(move || controller.fetch_file(&file.name))
                .await;

            step = match fetched {
                Err(e) => {
                    tracing::error!("{} loading error: {}", file.name, e);
                    Step::Failed(e)
                }
                Ok(lines) => {
                    let (records, rejected) = codec::parse_lines(&lines);
                    let oldest = records.iter().map(|r| r.timestamp).min();

                    let mut guard = engine.lock().await;
                    guard.set_connected(true);
                    let (outcome, pending) = guard.merge_batch(records);
                    drop(guard);

                    if let Some(pending) = pending {
                        if let Err(e) = pending.write().await {
                            tracing::warn!("Failed to persist cache: {}", e);
                        }
                    }

                    report.fetched.push(file.name.clone());
                    report.inserted += outcome.inserted.len();
                    report.skipped_lines += rejected.len();

                    tracing::info!(
                        file = %file.name,
                        lines = lines.len(),
                        inserted = outcome.inserted.len(),
                        "File merged"
                    );

                    if index > 0 && reaches_past_cache(oldest, local_newest) {
                        Step::Fetch(index - 1)
                    } else {
                        Step::Done
                    }
                }
            };
        }

        let mut engine = engine.lock().await;
        if let Step::Failed(e) = step {
            engine.set_connected(false);
            report.outcome = LoadOutcome::Failed(e.to_string());
        }
        engine.rebuild();

        tracing::info!(
            outcome = ?report.outcome,
            files = report.fetched.len(),
            inserted = report.inserted,
            "History load finished"
        );
        report
    }
}

/// True while the file's oldest record is still newer than anything cached,
/// so older files may hold records the cache lacks. A file without any
/// parsable record proves nothing and the walk continues.
fn reaches_past_cache(oldest_in_file: Option<DateTime<Utc>>, local_newest: Option<DateTime<Utc>>) -> bool {
    // ---
    match (oldest_in_file, local_newest) {
        (Some(oldest), Some(newest)) => oldest > newest,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::cache::{CacheStore, LocalCache};
    use crate::codec::time;
    use crate::error::ControllerError;
    use crate::fetch::FetchMode;
    use crate::models::{ControllerState, EventTag, InfoPayload, Record};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Serves canned file contents; names listed in `broken` always fail.
    #[derive(Default)]
    struct FakeController {
        files: HashMap<String, Vec<Value>>,
        broken: Vec<String>,
        requests: StdMutex<Vec<String>>,
    }

    impl Controller for FakeController {
        async fn fetch_state(&self) -> Result<ControllerState, ControllerError> {
            Err(ControllerError::Payload("unused".into()))
        }

        async fn fetch_file(&self, name: &str) -> Result<Vec<Value>, ControllerError> {
            self.requests.lock().unwrap().push(name.to_string());
            if self.broken.iter().any(|b| b == name) {
                return Err(ControllerError::Payload("timeout".into()));
            }
            Ok(self.files.get(name).cloned().unwrap_or_default())
        }

        async fn fetch_info(&self, _mode: FetchMode) -> Result<InfoPayload, ControllerError> {
            Err(ControllerError::Payload("unused".into()))
        }

        async fn delete_file(&self, _name: &str) -> Result<bool, ControllerError> {
            Ok(false)
        }
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 - 1_700_000_000 % 60 + minutes * 60, 0).unwrap()
    }

    fn line(minutes: i64) -> Value {
        json!([time::encode(at(minutes)), 200])
    }

    fn file(name: &str) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            size_bytes: 100,
        }
    }

    /// Files whose oldest records sit at minutes 50, 150 and 250.
    fn three_files() -> FakeController {
        FakeController {
            files: HashMap::from([
                ("20_1_1".to_string(), vec![line(50), line(100)]),
                ("20_1_2".to_string(), vec![line(150), line(200)]),
                ("20_1_3".to_string(), vec![line(250), line(300)]),
            ]),
            ..FakeController::default()
        }
    }

    async fn engine_with(records: Vec<Record>, files: &[&str]) -> Mutex<SyncEngine> {
        // ---
        let mut engine = SyncEngine::new(LocalCache::new(CacheStore::Memory), true);
        let _ = engine.ingest(records);
        let state: ControllerState = serde_json::from_value(json!({
            "dt": files.iter().map(|n| json!({"n": n, "s": 100})).collect::<Vec<_>>()
        }))
        .unwrap();
        engine.apply_controller_state(state);
        Mutex::new(engine)
    }

    fn reading(minutes: i64) -> Record {
        Record {
            timestamp: at(minutes),
            readings: vec![200],
            event: EventTag::Reading,
        }
    }

    #[tokio::test]
    async fn test_cascade_stops_once_file_reaches_cached_data() {
        // ---
        let controller = three_files();
        let engine = engine_with(vec![reading(200)], &["20_1_1", "20_1_2", "20_1_3"]).await;

        let report = HistoryLoader::default().run(&controller, &engine).await;

        assert_eq!(report.outcome, LoadOutcome::Done);
        assert_eq!(report.fetched, vec!["20_1_3", "20_1_2"]);
        assert_eq!(*controller.requests.lock().unwrap(), vec!["20_1_3", "20_1_2"]);
        // 200 was already cached
        assert_eq!(report.inserted, 3);
        assert_eq!(engine.lock().await.cache().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_cache_walks_every_file() {
        // ---
        let controller = three_files();
        let engine = engine_with(vec![], &["20_1_3", "20_1_1", "20_1_2"]).await;

        let report = HistoryLoader::default().run(&controller, &engine).await;

        assert_eq!(report.fetched, vec!["20_1_3", "20_1_2", "20_1_1"]);
        let engine = engine.lock().await;
        assert_eq!(engine.cache().len(), 6);
        assert_eq!(engine.counters().total_points, 6);
        assert_eq!(engine.cache().oldest_timestamp(), Some(at(50)));
    }

    #[tokio::test]
    async fn test_up_to_date_cache_fetches_only_newest_file() {
        // ---
        let controller = three_files();
        let engine = engine_with(vec![reading(400)], &["20_1_1", "20_1_2", "20_1_3"]).await;

        let report = HistoryLoader::default().run(&controller, &engine).await;

        assert_eq!(report.fetched, vec!["20_1_3"]);
    }

    #[tokio::test]
    async fn test_no_remote_files_is_done_immediately() {
        // ---
        let controller = three_files();
        let engine = engine_with(vec![reading(10)], &[]).await;

        let report = HistoryLoader::default().run(&controller, &engine).await;

        assert_eq!(report.outcome, LoadOutcome::Done);
        assert!(report.fetched.is_empty());
        assert!(controller.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_loaded_data() {
        // ---
        let controller = FakeController {
            broken: vec!["20_1_2".to_string()],
            ..three_files()
        };
        let engine = engine_with(vec![], &["20_1_1", "20_1_2", "20_1_3"]).await;

        let report = HistoryLoader::default().run(&controller, &engine).await;

        assert_eq!(
            report.outcome,
            LoadOutcome::Failed("controller payload could not be parsed: timeout(x5)".to_string())
        );
        assert_eq!(report.fetched, vec!["20_1_3"]);
        // 1 success + 5 attempts on the broken file, then the session ends
        assert_eq!(controller.requests.lock().unwrap().len(), 6);

        let engine = engine.lock().await;
        assert!(!engine.connected());
        assert_eq!(engine.cache().len(), 2);
        assert_eq!(engine.counters().total_points, 2);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        // ---
        let controller = FakeController {
            files: HashMap::from([("20_1_1".to_string(), vec![line(10), json!([])])]),
            ..FakeController::default()
        };
        let engine = engine_with(vec![], &["20_1_1"]).await;

        let report = HistoryLoader::default().run(&controller, &engine).await;

        assert_eq!(report.outcome, LoadOutcome::Done);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_lines, 1);
    }
}
