//! Outbound call policy: rate limit, per-call timeout and retry with
//! exponential back-off.
//!
//! One [`CallPolicy`] is shared by every worker, so the token bucket bounds
//! the combined request rate of the whole run.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use ratings_core::error::{RatingsError, Result};
use ratings_core::settings::ServiceConfig;

pub struct CallPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    timeout: Duration,
    limiter: DefaultDirectRateLimiter,
}

impl CallPolicy {
    pub fn from_config(config: &ServiceConfig) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            timeout: Duration::from_millis(config.call_timeout_ms),
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Back-off before attempt `attempt` (0-based): none for the first,
    /// then `base`, `2 × base`, `4 × base`, …
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_backoff
            .saturating_mul(1u32 << (attempt - 1).min(16))
    }

    /// Run `op` under the policy.
    ///
    /// Transient failures and timeouts are retried until attempts run out;
    /// the last error is returned then. Non-transient errors return at once.
    pub async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err = RatingsError::TransientService(format!("{what}: no attempt made"));

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let sleep = self.backoff(attempt);
                tracing::debug!(what, attempt, sleep_ms = sleep.as_millis() as u64, "retrying after back-off");
                tokio::time::sleep(sleep).await;
            }

            self.limiter.until_ready().await;

            match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(what, attempt, error = %e, "call attempt failed");
                    last_err = e;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::warn!(what, attempt, timeout_ms = self.timeout.as_millis() as u64, "call timed out");
                    last_err = RatingsError::TransientService(format!(
                        "{what} timed out after {:?}",
                        self.timeout
                    ));
                }
            }
        }

        Err(last_err)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
