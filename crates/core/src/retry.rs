//! Bounded retry with exponential backoff for rate-limited upstream calls.
//!
//! Only `UpstreamError::RateLimited` is retried. Each wait is
//! `base * 2^attempt` plus a uniform jitter in `[0, base)`, and attempts run
//! strictly one after another.

use crate::llm_client::UpstreamError;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Abstraction over waiting, so backoff can be observed without real timers.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// The deterministic part of the wait after a failed `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(30)))
    }

    /// Backoff plus a random component drawn from `[0, base_delay)`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let backoff = self.backoff(attempt);
        let base_nanos = u64::try_from(self.base_delay.as_nanos()).unwrap_or(u64::MAX);
        if base_nanos == 0 {
            return backoff;
        }
        backoff.saturating_add(Duration::from_nanos(rng.random_range(0..base_nanos)))
    }

    /// Runs `operation` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `operation` receives the zero-based attempt number.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, mut operation: F) -> Result<T, UpstreamError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        for attempt in 0..self.max_attempts {
            match operation(attempt).await {
                Err(UpstreamError::RateLimited) => {
                    if attempt + 1 < self.max_attempts {
                        let delay = self.delay_for(attempt, &mut rand::rng());
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "Upstream rate limited, backing off"
                        );
                        sleeper.sleep(delay).await;
                    }
                }
                other => return other,
            }
        }
        Err(UpstreamError::RetriesExhausted {
            attempts: self.max_attempts,
        })
    }
}
