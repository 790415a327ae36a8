//! Exponential backoff for storage operations.
//!
//! Only errors that report themselves as transient (see [`Transient`]) are
//! retried; anything else propagates on the first failure.
//!
//! # Backoff Strategy
//!
//! The delay after failed attempt `n` (1-based) is:
//! ```text
//! delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=jitter)
//! ```
//! With the defaults (6 attempts, 2s base, 30s cap) the waits between
//! attempts are 2s, 4s, 8s, 16s and 30s.

use rand::{Rng, rng};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Errors that can tell whether retrying might help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Retry settings shared by every storage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles with each further failure.
    pub base_delay: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound on the random delay added to each wait.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Same policy with jitter disabled, giving deterministic delays.
    pub fn without_jitter(self) -> Self {
        Self {
            jitter: Duration::ZERO,
            ..self
        }
    }

    /// Backoff before the attempt that follows failed attempt `attempt` (1-based),
    /// excluding jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1 << exp).min(self.max_delay)
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter.is_zero() {
            return delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt cap is reached. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        self.run_inner(op, None).await
    }

    /// Like [`run`](Self::run), but a cancelled `token` cuts the backoff
    /// short and surfaces the last error instead of waiting it out.
    pub async fn run_cancellable<T, E, F, Fut>(
        &self,
        op: F,
        token: &CancellationToken,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        self.run_inner(op, Some(token)).await
    }

    async fn run_inner<T, E, F, Fut>(
        &self,
        mut op: F,
        token: Option<&CancellationToken>,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let e = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !e.is_transient() {
                error!(attempt, error = %e, "storage operation failed with a non-transient error");
                return Err(e);
            }

            if attempt >= self.max_attempts {
                error!(
                    attempt,
                    max = self.max_attempts,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %e,
                    "storage operation exhausted retries"
                );
                return Err(e);
            }

            let delay = self.delay_with_jitter(attempt);
            warn!(
                attempt,
                max = self.max_attempts,
                elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                ?delay,
                error = %e,
                "storage operation failed; backing off"
            );

            match token {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            warn!(attempt, "retry interrupted by shutdown");
                            return Err(e);
                        }
                        _ = sleep(delay) => {}
                    }
                }
                None => sleep(delay).await,
            }
        }
    }
}
