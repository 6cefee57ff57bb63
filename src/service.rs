//! Session orchestration: startup sequence, manual reloads and live polling.
//!
//! The service owns the controller client and the engine. The engine lock is
//! only taken between network requests, never across one.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::codec;
use crate::engine::{IngestSummary, SyncEngine};
use crate::error::{ControllerError, InvalidReadInterval};
use crate::fetch::{Controller, FetchMode, RetryingFetcher};
use crate::history::{HistoryLoader, LoadReport};
use crate::poller::LivePoller;

// ---

/// Knobs the service takes from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Attempts for the controller state fetch and for each history file.
    pub fetch_attempts: u32,
    /// Poll period used until the controller reports its own.
    pub fallback_read_interval: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            fetch_attempts: 5,
            fallback_read_interval: Duration::from_secs(180),
        }
    }
}

pub struct SyncService<C: Controller> {
    controller: C,
    engine: Mutex<SyncEngine>,
    load_gate: Arc<Mutex<()>>,
    last_load: Mutex<Option<LoadReport>>,
    poller: Mutex<LivePoller>,
    fetcher: RetryingFetcher,
    loader: HistoryLoader,
    fallback_read_interval: Duration,
}

impl<C: Controller> SyncService<C> {
    // ---
    pub fn new(controller: C, engine: SyncEngine, settings: ServiceSettings) -> Arc<Self> {
        Arc::new(Self {
            controller,
            engine: Mutex::new(engine),
            load_gate: Arc::new(Mutex::new(())),
            last_load: Mutex::new(None),
            poller: Mutex::new(LivePoller::new(settings.fallback_read_interval)),
            fetcher: RetryingFetcher::new(settings.fetch_attempts),
            loader: HistoryLoader::new(settings.fetch_attempts),
            fallback_read_interval: settings.fallback_read_interval,
        })
    }

    /// Startup sequence: cache, controller state, history, catch-up, poller.
    ///
    /// The poller starts once the history load has ended, whether it
    /// finished or failed.
    pub async fn bootstrap(self: &Arc<Self>) -> LoadReport {
        // ---
        let cached = self.engine.lock().await.load_cache().await;
        tracing::info!(cached, "Cache loaded");

        let report = {
            let _gate = self.load_gate.lock().await;
            self.refresh_state().await;
            self.run_load().await
        };

        if let Err(e) = self.poll_once(FetchMode::SinceLast).await {
            tracing::warn!("Catch-up fetch failed: {}", e);
        }

        self.start_polling().await;
        report
    }

    /// Fetch the controller state with retries and adopt it.
    ///
    /// Returns false when the controller could not be reached; cached data
    /// stays usable and the connection flag is cleared.
    pub async fn refresh_state(&self) -> bool {
        // ---
        let controller = &self.controller;
        match self.fetcher.fetch(move || controller.fetch_state()).await {
            Ok(state) => {
                tracing::info!(
                    files = state.files.len(),
                    read_secs = state.conf.read,
                    "Controller state fetched"
                );
                let mut engine = self.engine.lock().await;
                engine.apply_controller_state(state);
                engine.set_connected(true);
                true
            }
            Err(e) => {
                tracing::error!("Controller state unavailable: {}", e);
                self.engine.lock().await.set_connected(false);
                false
            }
        }
    }

    async fn run_load(&self) -> LoadReport {
        // ---
        let report = self.loader.run(&self.controller, &self.engine).await;
        *self.last_load.lock().await = Some(report.clone());
        report
    }

    /// Start a manual reload in the background.
    ///
    /// Returns `None` when a load is already running; concurrent triggers
    /// are coalesced into the one in flight.
    pub fn begin_load(self: &Arc<Self>) -> Option<JoinHandle<LoadReport>> {
        // ---
        let gate = Arc::clone(&self.load_gate).try_lock_owned().ok()?;
        let service = Arc::clone(self);

        Some(tokio::spawn(async move {
            let _gate = gate;
            service.refresh_state().await;
            service.run_load().await
        }))
    }

    /// Run a manual reload to completion, or `None` if one is already running.
    pub async fn load_now(self: &Arc<Self>) -> Option<LoadReport> {
        // ---
        let handle = self.begin_load()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("History load task failed: {}", e);
                None
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.load_gate.try_lock().is_err()
    }

    pub async fn last_load(&self) -> Option<LoadReport> {
        self.last_load.lock().await.clone()
    }

    /// One live fetch, merged and fed to the derived state. Not retried;
    /// a failure clears the connection flag and the next tick tries again.
    pub async fn poll_once(&self, mode: FetchMode) -> Result<IngestSummary, ControllerError> {
        // ---
        let info = match self.controller.fetch_info(mode).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(?mode, "Live fetch failed: {}", e);
                self.engine.lock().await.set_connected(false);
                return Err(e);
            }
        };

        let lines = match (&info.last, &info.cur) {
            (Some(last), _) => last.clone(),
            (None, Some(cur)) => vec![cur.clone()],
            (None, None) => Vec::new(),
        };
        let (records, _) = codec::parse_lines(&lines);

        let mut engine = self.engine.lock().await;
        engine.set_connected(true);
        let (summary, pending) = engine.ingest(records);
        if mode == FetchMode::Current {
            engine.apply_live_info(&info);
        }
        drop(engine);

        if let Some(pending) = pending {
            if let Err(e) = pending.write().await {
                tracing::warn!("Failed to persist cache: {}", e);
            }
        }

        tracing::debug!(
            ?mode,
            received = summary.received,
            inserted = summary.inserted,
            replayed = summary.replayed,
            "Live poll merged"
        );
        Ok(summary)
    }

    /// Start (or restart) the live poller at the controller's read period.
    pub async fn start_polling(self: &Arc<Self>) {
        // ---
        let period = self
            .engine
            .lock()
            .await
            .read_interval_secs()
            .map_or(self.fallback_read_interval, Duration::from_secs);

        let mut poller = self.poller.lock().await;
        poller.set_period(period);
        self.spawn_ticks(&mut poller);
    }

    fn spawn_ticks(self: &Arc<Self>, poller: &mut LivePoller) {
        // ---
        let weak: Weak<Self> = Arc::downgrade(self);
        poller.start(move || {
            let weak = weak.clone();
            async move {
                if let Some(service) = weak.upgrade() {
                    // failure is already logged and flagged
                    let _ = service.poll_once(FetchMode::Current).await;
                }
            }
        });
    }

    pub async fn stop_polling(&self) {
        self.poller.lock().await.stop();
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.is_running()
    }

    pub async fn poll_period(&self) -> Duration {
        self.poller.lock().await.period()
    }

    /// Change the poll period. A running poller restarts with alignment
    /// recomputed from now; a stopped one picks it up when started.
    pub async fn set_read_interval(self: &Arc<Self>, seconds: i64) -> Result<Duration, InvalidReadInterval> {
        // ---
        let period = u64::try_from(seconds)
            .ok()
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .ok_or(InvalidReadInterval(seconds))?;

        let mut poller = self.poller.lock().await;
        poller.set_period(period);
        if poller.is_running() {
            self.spawn_ticks(&mut poller);
        }
        tracing::info!(seconds, "Read interval changed");
        Ok(period)
    }

    /// Ask the controller to delete a log file; drop it from the index when
    /// the controller confirms.
    pub async fn delete_file(&self, name: &str) -> Result<bool, ControllerError> {
        // ---
        let deleted = self.controller.delete_file(name).await?;
        if deleted {
            self.engine.lock().await.remove_file(name);
            tracing::info!(file = name, "Remote file deleted");
        } else {
            tracing::warn!(file = name, "Controller declined to delete file");
        }
        Ok(deleted)
    }

    pub fn engine(&self) -> &Mutex<SyncEngine> {
        &self.engine
    }

    pub async fn shutdown(&self) {
        // ---
        self.stop_polling().await;
        let snapshot = self.engine.lock().await.snapshot();
        let flushed = match snapshot {
            Ok(pending) => pending.write().await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = flushed {
            tracing::warn!("Final cache flush failed: {}", e);
        }
    }
}
