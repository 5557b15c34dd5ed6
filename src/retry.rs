//! Retry Logic with Exponential Backoff
//!
//! Remote calls are wrapped in [`RetryPolicy::run`], which retries transient
//! failures with randomized exponential backoff.
//!
//! ```text
//! interval(n) = min(initial * multiplier^n, max_interval)
//! sleep(n)    = interval(n) * uniform(1 - randomization, 1 + randomization)
//! ```
//!
//! ## Retryable vs Non-Retryable Errors
//!
//! **Retryable** (transient failures):
//! - `Remote` 429, 500, 502, 503, 504: overload or server fault
//! - `NotFound`: objects created moments ago may not be visible yet
//!   (configurable, on by default)
//! - `Internal` / `SerializationError`: only when `retry_unclassified` is set
//!
//! **Non-Retryable**: everything else, including cancellation, capacity and
//! rollback errors.
//!
//! Retrying stops once the next sleep would exceed the elapsed-time budget;
//! the last error is returned. A cancellation during a backoff sleep ends
//! the loop with `Error::Cancelled`.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    Stop,
}

/// Retry policy configuration for exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    /// Total time budget; `None` retries until cancelled
    pub max_elapsed: Option<Duration>,
    pub retry_not_found: bool,
    pub retry_unclassified: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_interval: config.initial_interval(),
            max_interval: config.max_interval(),
            multiplier: config.multiplier,
            randomization_factor: config.randomization_factor,
            max_elapsed: config.max_elapsed(),
            retry_not_found: config.retry_not_found,
            retry_unclassified: config.retry_unclassified,
        }
    }
}

impl RetryPolicy {
    /// Classify an error returned by an attempt.
    pub fn classify(&self, err: &Error) -> Disposition {
        match err {
            Error::Remote { code, .. } if matches!(code, 429 | 500 | 502 | 503 | 504) => Disposition::Retry,
            Error::NotFound(_) if self.retry_not_found => Disposition::Retry,
            Error::Internal(_) | Error::SerializationError(_) if self.retry_unclassified => Disposition::Retry,
            _ => Disposition::Stop,
        }
    }

    /// Un-randomized backoff interval before retry number `attempt` (0-indexed).
    pub fn interval(&self, attempt: u32) -> Duration {
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let interval = self.interval(attempt).as_secs_f64();
        if self.randomization_factor <= 0.0 || interval <= 0.0 {
            return Duration::from_secs_f64(interval);
        }
        let delta = self.randomization_factor * interval;
        let jittered = rand::thread_rng().gen_range((interval - delta)..=(interval + delta));
        Duration::from_secs_f64(jittered)
    }

    /// Run `operation` until it succeeds, fails permanently, exhausts the time
    /// budget or `cancel` fires during a backoff sleep.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, name: &'static str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation = name, attempt = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if self.classify(&err) == Disposition::Stop {
                return Err(err);
            }

            let backoff = self.jittered(attempt);
            if let Some(budget) = self.max_elapsed {
                if started.elapsed() + backoff > budget {
                    warn!(operation = name, attempts = attempt + 1, error = %err, "Retry budget exhausted, giving up");
                    return Err(err);
                }
            }

            warn!(
                operation = name,
                attempt = attempt + 1,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Retryable error, backing off"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(backoff) => {}
            }
            attempt = attempt.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(100),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed: Some(Duration::from_secs(5)),
            retry_not_found: true,
            retry_unclassified: false,
        }
    }

    fn remote(code: u16) -> Error {
        Error::Remote {
            code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_classification() {
        let policy = fast();
        assert_eq!(policy.classify(&remote(500)), Disposition::Retry);
        assert_eq!(policy.classify(&remote(429)), Disposition::Retry);
        assert_eq!(policy.classify(&remote(403)), Disposition::Stop);
        assert_eq!(policy.classify(&Error::NotFound("x".into())), Disposition::Retry);
        assert_eq!(policy.classify(&Error::Cancelled), Disposition::Stop);
        assert_eq!(policy.classify(&Error::Internal("x".into())), Disposition::Stop);
        assert_eq!(
            policy.classify(&Error::InsufficientCapacity {
                requested: 2,
                available: 1
            }),
            Disposition::Stop
        );

        let lenient = RetryPolicy {
            retry_unclassified: true,
            retry_not_found: false,
            ..fast()
        };
        assert_eq!(lenient.classify(&Error::Internal("x".into())), Disposition::Retry);
        assert_eq!(lenient.classify(&Error::NotFound("x".into())), Disposition::Stop);
    }

    #[test]
    fn test_interval_growth_is_capped() {
        let policy = fast();
        assert_eq!(policy.interval(0), Duration::from_millis(10));
        assert_eq!(policy.interval(1), Duration::from_millis(20));
        assert_eq!(policy.interval(2), Duration::from_millis(40));
        assert_eq!(policy.interval(10), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let policy = fast();
        let cancel = CancellationToken::new();
        let attempts = AtomicUsize::new(0);

        let value = policy
            .run(&cancel, "flaky", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(remote(503))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_errors_stop_immediately() {
        let policy = fast();
        let cancel = CancellationToken::new();
        let attempts = AtomicUsize::new(0);

        let result: Result<()> = policy
            .run(&cancel, "denied", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(remote(403))
            })
            .await;

        assert!(matches!(result, Err(Error::Remote { code: 403, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let policy = RetryPolicy {
            max_elapsed: Some(Duration::from_millis(250)),
            ..fast()
        };
        let cancel = CancellationToken::new();

        let result: Result<()> = policy
            .run(&cancel, "down", || async { Err(remote(500)) })
            .await;
        assert!(matches!(result, Err(Error::Remote { code: 500, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy {
            max_elapsed: None,
            ..fast()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            trigger.cancel();
        });

        let result: Result<()> = policy
            .run(&cancel, "down", || async { Err(remote(500)) })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
