//! Bounded polling of remote job state.
//!
//! Waiting for a CI job has two phases with very different time scales, so the
//! interval/deadline pairs are configured separately:
//!
//! - **Start**: the triggered job appears in the backend's list. 1 second
//!   interval, 1 minute deadline by default.
//! - **Finish**: the identified job reaches a terminal status. 10 second
//!   interval, 30 minute deadline by default.
//!
//! The windows are plain configuration handed to [`poll_until`]; tests inject
//! millisecond windows instead of relying on any environment switch inside the
//! poller.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

use crate::error::DeployError;

const DEFAULT_START_INTERVAL_SECS: u64 = 1;
const DEFAULT_START_TIMEOUT_SECS: u64 = 60;
const DEFAULT_FINISH_INTERVAL_SECS: u64 = 10;
const DEFAULT_FINISH_TIMEOUT_SECS: u64 = 30 * 60;

/// Upper bound for any configured interval or timeout: one day.
pub const MAX_POLL_SECS: u64 = 24 * 60 * 60;

/// One interval/deadline pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    /// Sleep before every check.
    pub interval: Duration,
    /// Total time after which polling gives up.
    pub timeout: Duration,
}

impl PollWindow {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        PollWindow { interval, timeout }
    }
}

/// Poll windows for both phases of waiting on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub start: PollWindow,
    pub finish: PollWindow,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl PollSettings {
    pub fn new() -> Self {
        PollSettings {
            start: PollWindow::new(
                Duration::from_secs(DEFAULT_START_INTERVAL_SECS),
                Duration::from_secs(DEFAULT_START_TIMEOUT_SECS),
            ),
            finish: PollWindow::new(
                Duration::from_secs(DEFAULT_FINISH_INTERVAL_SECS),
                Duration::from_secs(DEFAULT_FINISH_TIMEOUT_SECS),
            ),
        }
    }

    /// Reads overrides through `lookup`, falling back to defaults.
    ///
    /// Keys: `REVIEW_APPS_{START,FINISH}_POLL_{INTERVAL,TIMEOUT}_SECS`. Each
    /// value is a whole number of seconds, at most [`MAX_POLL_SECS`]; intervals
    /// must be at least one second.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DeployError> {
        let secs = |key: &str, min: u64, default: Duration| -> Result<Duration, DeployError> {
            let Some(raw) = lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
            else {
                return Ok(default);
            };
            match raw.parse::<u64>() {
                Ok(n) if (min..=MAX_POLL_SECS).contains(&n) => Ok(Duration::from_secs(n)),
                _ => Err(DeployError::Validation(format!(
                    "{} must be between {} and {} seconds, not \"{}\"",
                    key, min, MAX_POLL_SECS, raw
                ))),
            }
        };
        let defaults = Self::new();
        Ok(PollSettings {
            start: PollWindow::new(
                secs("REVIEW_APPS_START_POLL_INTERVAL_SECS", 1, defaults.start.interval)?,
                secs("REVIEW_APPS_START_POLL_TIMEOUT_SECS", 0, defaults.start.timeout)?,
            ),
            finish: PollWindow::new(
                secs("REVIEW_APPS_FINISH_POLL_INTERVAL_SECS", 1, defaults.finish.interval)?,
                secs("REVIEW_APPS_FINISH_POLL_TIMEOUT_SECS", 0, defaults.finish.timeout)?,
            ),
        })
    }
}

/// Why a poll ended without a result.
#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("gave up after {elapsed:?}")]
    TimedOut { elapsed: Duration, checks: u32 },

    /// The check itself failed; polling stops at the first failure.
    #[error("{0}")]
    Check(E),
}

/// Repeatedly sleeps `window.interval` then runs `check`, until `check`
/// yields a value or `window.timeout` has elapsed.
///
/// Checks never overlap: each one is awaited before the next sleep. The
/// deadline is evaluated after every check, so a check that completes exactly
/// at the deadline still counts.
pub async fn poll_until<T, E, F, Fut>(window: PollWindow, mut check: F) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let deadline = started.checked_add(window.timeout);
    let mut checks = 0u32;

    loop {
        tokio::time::sleep(window.interval).await;
        checks += 1;
        if let Some(value) = check().await.map_err(PollError::Check)? {
            return Ok(value);
        }
        trace!(checks, "poll condition not met");
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(PollError::TimedOut {
                elapsed: started.elapsed(),
                checks,
            });
        }
    }
}
