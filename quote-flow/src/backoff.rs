//! Capped exponential backoff shared by the query cache and the navigation
//! retry loop.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy: `delay(n) = min(base * 2^n, cap)` where `n` is the zero-based
/// index of the failure that just happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Same retry budget, no waiting.
    pub const fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    pub const fn no_retry() -> Self {
        Self::immediate(0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn delay_for(&self, failure_index: u32) -> Duration {
        let factor = 2u32.checked_pow(failure_index).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Information handed to the retry observer before each backoff sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Run `operation` until it succeeds, the error is rejected by `is_retryable`,
/// or the policy's budget is spent. `on_retry` fires once per scheduled retry.
pub async fn retry_with_backoff<T, E, Op, Fut, R, N>(
    policy: &BackoffPolicy,
    mut is_retryable: R,
    mut on_retry: N,
    mut operation: Op,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
    N: FnMut(RetryAttempt, &E),
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !is_retryable(&error) {
                    return Err(error);
                }
                let delay = policy.delay_for(attempt - 1);
                on_retry(
                    RetryAttempt {
                        attempt,
                        max_attempts,
                        delay,
                    },
                    &error,
                );
                debug!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
