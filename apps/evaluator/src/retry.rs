//! Retryable operation: one bounded attempt loop shared by every caller that
//! talks to a flaky provider.
//!
//! The policy knows nothing about providers: callers hand in the operation and a
//! classifier that sorts failures into quota-class and generic-class.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How a failed attempt is classified. Success is simply `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Usage-limit exhaustion, rate limiting, or an empty response under load.
    Quota,
    Generic,
}

/// Returned when every attempt failed. Carries the last error and its class.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub class: ErrorClass,
    pub attempts: u32,
    pub error: E,
}

/// Bounded attempts with exponential backoff and no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// One backoff time unit.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
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

    /// Same policy with a different attempt budget.
    pub fn with_attempts(self, max_attempts: u32) -> Self {
        Self::new(max_attempts, self.base_delay)
    }

    /// Delay slept after the 0-indexed `attempt` failed: 1, 2, 4 ... units.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(20))
    }

    /// Runs `op` until it succeeds or the attempt budget is spent.
    pub async fn run<T, E, F, Fut, C>(&self, mut op: F, classify: C) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let class = classify(&error);
            match class {
                ErrorClass::Quota => warn!(
                    attempt = attempt + 1,
                    max_attempts, "quota or rate limit signal: {error}"
                ),
                ErrorClass::Generic => warn!(
                    attempt = attempt + 1,
                    max_attempts, "attempt failed: {error}"
                ),
            }

            if attempt + 1 >= max_attempts {
                return Err(Exhausted {
                    class,
                    attempts: attempt + 1,
                    error,
                });
            }

            let delay = self.delay_after(attempt);
            warn!("retrying in {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
