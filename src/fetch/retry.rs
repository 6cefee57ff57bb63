//! Bounded, immediate retry with aggregated error reporting.

use std::fmt::Display;
use std::future::Future;

use crate::error::AggregatedError;

// ---

/// Runs a fallible async operation up to `attempts` times.
#[derive(Debug, Clone, Copy)]
pub struct RetryingFetcher {
    attempts: u32,
}

impl RetryingFetcher {
    // ---
    /// A fetcher that tries at least once.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Invoke `operation` until it succeeds or the attempt budget is spent.
    ///
    /// There is no delay between attempts. Each failure message is recorded;
    /// on exhaustion they are folded into one [`AggregatedError`].
    pub async fn fetch<T, E, F, Fut>(&self, mut operation: F) -> Result<T, AggregatedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        // ---
        let mut failures: Vec<(String, u32)> = Vec::new();

        for attempt in 1..=self.attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let message = e.to_string();
                    tracing::debug!(attempt, max = self.attempts, "Attempt failed: {}", message);

                    match failures.iter_mut().find(|(m, _)| *m == message) {
                        Some((_, count)) => *count += 1,
                        None => failures.push((message, 1)),
                    }
                }
            }
        }

        Err(AggregatedError {
            message: summarize(&failures),
            attempts: self.attempts,
        })
    }
}

/// `msg(xN)` per distinct failure in first-seen order, joined with `; `.
/// Messages seen once carry no count.
fn summarize(failures: &[(String, u32)]) -> String {
    // ---
    failures
        .iter()
        .map(|(message, count)| {
            if *count > 1 {
                format!("{message}(x{count})")
            } else {
                message.clone()
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
