//! Bounded exponential backoff for calls to the placement driver.

use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;

const BACKOFF_MAX_SHIFT: u32 = 16;

/// Retry budget for one logical call.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    #[serde(rename = "base_delay_ms", deserialize_with = "deserialize_millis")]
    pub base_delay: Duration,
    /// Upper bound for any single delay before jitter.
    #[serde(rename = "max_delay_ms", deserialize_with = "deserialize_millis")]
    pub max_delay: Duration,
    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(1),
            max_attempts: 6,
        }
    }
}

/// Why `retry` gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last_error:#}")]
    Exhausted {
        attempts: u32,
        last_error: anyhow::Error,
    },
    #[error("retry cancelled")]
    Cancelled,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// Inputs:
    /// - `attempt`: consecutive failures so far.
    ///
    /// Output:
    /// - `base * 2^(attempt-1)` capped at `max_delay`, with deterministic
    ///   jitter in [80%, 120%] so concurrent callers do not retry in lockstep.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(BACKOFF_MAX_SHIFT);
        let base_ms = duration_ms(self.base_delay);
        let capped_ms = base_ms
            .saturating_mul(1u64 << shift)
            .min(duration_ms(self.max_delay).max(base_ms));

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        attempt.hash(&mut hasher);
        now_unix_ms().hash(&mut hasher);
        let jitter_percent = 80u64 + (hasher.finish() % 41);
        Duration::from_millis((capped_ms.saturating_mul(jitter_percent) / 100).max(1))
    }
}

/// Run `op` until it succeeds, the attempt budget runs out, or `cancel` fires.
///
/// `op` receives the 1-based attempt number. Cancellation interrupts both an
/// in-flight attempt and a backoff sleep.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt = attempt.saturating_add(1);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = op(attempt) => result,
        };
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: err,
                })
            }
            Err(err) => err,
        };

        let delay = policy.backoff_delay(attempt);
        tracing::debug!(
            attempt,
            max_attempts,
            delay_ms = duration_ms(delay),
            error = ?err,
            "attempt failed, backing off"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

pub(crate) fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or(0)
}
