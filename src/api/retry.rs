//! Backoff for remote calls that failed transiently.
//!
//! This is the only place anything is retried. Steps and the orchestrator
//! never retry; a failed run is simply run again.

use std::future::Future;
use std::time::Duration;

use reqwest::Method;
use tracing::debug;

use super::error::ApiError;

/// How many times to try a call and how long to wait in between.
///
/// The wait doubles after every failed attempt, starting at `base_delay` and
/// never exceeding `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Zero behaves like one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Four attempts, waiting 1s, 2s and 4s between them.
    pub const DEFAULT: Self = Self {
        attempts: 4,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(8),
    };

    /// Wait before attempt `n + 1`, after `n` failures (`n >= 1`).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    #[default]
    RetryTransient,
    /// Single attempt. Used for calls that create something remotely, where
    /// a lost response could otherwise lead to a duplicate.
    NoRetry,
}

impl RetryPolicy {
    /// `POST` creates (apps, dynos, pipelines); everything else is safe to repeat.
    pub fn for_method(method: &Method) -> Self {
        if *method == Method::POST {
            RetryPolicy::NoRetry
        } else {
            RetryPolicy::RetryTransient
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// runs out of attempts. The last error is returned as-is.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let attempts = match policy {
        RetryPolicy::NoRetry => 1,
        RetryPolicy::RetryTransient => config.attempts.max(1),
    };
    let mut failures = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        failures += 1;
        if !err.kind.is_retriable() || failures >= attempts {
            return Err(err);
        }
        let delay = config.delay_after(failures);
        debug!(failures, attempts, ?delay, error = %err, "transient API error, retrying");
        tokio::time::sleep(delay).await;
    }
}
