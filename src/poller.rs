//! Wall-clock aligned live polling.
//!
//! The first fire waits for the next multiple of the period counted from the
//! top of the hour (plus a safety margin), so readings line up on round
//! boundaries across restarts. After that the tick repeats every period.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---

/// Added to every aligned delay so the controller has written its reading.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(10);

const HOUR_MS: i64 = 3_600_000;

/// Delay from `now` until the next aligned fire for `period`.
pub fn aligned_delay(now: DateTime<Utc>, period: Duration) -> Duration {
    // ---
    let period_ms = (period.as_millis() as i64).max(1);
    let elapsed = now.timestamp_millis().rem_euclid(HOUR_MS);
    let next = (elapsed + period_ms - 1) / period_ms * period_ms;

    Duration::from_millis((next - elapsed) as u64) + SAFETY_MARGIN
}

struct Running {
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

/// Owns the recurring poll task.
pub struct LivePoller {
    period: Duration,
    running: Option<Running>,
}

impl LivePoller {
    // ---
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Takes effect on the next [`LivePoller::start`].
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    /// (Re)start ticking, aligned from the current wall clock. A running
    /// schedule is stopped first.
    pub fn start<F, Fut>(&mut self, tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = aligned_delay(Utc::now(), self.period);
        self.start_after(delay, tick);
    }

    fn start_after<F, Fut>(&mut self, delay: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // ---
        self.stop();

        let period = self.period;
        let (stop, mut stopped) = watch::channel(false);

        tracing::info!(
            period_secs = period.as_secs(),
            first_fire_in_secs = delay.as_secs(),
            "Live poller started"
        );

        let task = tokio::spawn(async move {
            // ---
            tokio::select! {
                biased;
                _ = stopped.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }
                // A tick in flight when stop arrives runs to completion;
                // the select above then ends the loop.
                tick().await;
            }
        });

        self.running = Some(Running { task, stop });
    }

    /// Stop ticking. No fetch is started after this returns.
    pub fn stop(&mut self) {
        // ---
        if let Some(running) = self.running.take() {
            let _ = running.stop.send(true);
            tracing::info!("Live poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }
}

impl Drop for LivePoller {
    fn drop(&mut self) {
        self.stop();
    }
}
