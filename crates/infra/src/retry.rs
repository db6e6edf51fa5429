//! Bounded retry of transient store failures.
//!
//! Every service call runs its store transaction through [`RetryPolicy::run`].
//! Only `StoreError::Concurrency` and `StoreError::Unavailable` are retried; domain
//! refusals surface immediately.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::StoreError;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first try (0 = no retries)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt) as u64)
    }

    /// Backoff for `attempt` spread by up to ±`jitter` of itself. Each call draws
    /// its own offset.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.backoff_ms(attempt);
        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    fn backoff_ms(&self, attempt: u32) -> f64 {
        if attempt == 0 {
            return 0.0;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// retries are used up. The last error is returned as is.
    pub fn run<T, F>(&self, operation: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let mut retries = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && self.should_retry(retries) => {
                    retries += 1;
                    let delay = self.delay_for_attempt(retries);
                    warn!(
                        operation,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store failure, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curtainworks_core::DomainError;
    use std::cell::Cell;

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(300))
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn linear_backoff() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
            ..RetryPolicy::fixed(3, Duration::from_millis(10))
        };
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(100),
            ..policy
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(30));
    }

    #[test]
    fn jitter_is_drawn_per_call_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::fixed(3, Duration::from_millis(200))
        };
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(200));

        let delays: Vec<Duration> = (0..64).map(|_| policy.delay_for_attempt(2)).collect();
        assert!(delays
            .iter()
            .all(|d| *d >= Duration::from_millis(100) && *d <= Duration::from_millis(300)));
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);

        let result = policy.run("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StoreError::Concurrency("stale".into()))
            } else {
                Ok(calls.get())
            }
        });

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::fixed(2, Duration::ZERO);

        let result: Result<(), _> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(StoreError::Unavailable("down".into()))
        });

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn domain_refusals_are_not_retried() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::fixed(5, Duration::ZERO);

        let result: Result<(), _> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(StoreError::Rejected(DomainError::validation("bad")))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
