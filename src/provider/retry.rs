//! Retry logic with exponential backoff for transient provider errors.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{EdgeweaveError, ProviderError, Result};

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (0 for the first retry), capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay)
    }

    /// Runs `operation`, retrying transient errors.
    ///
    /// A `Retry-After` hint from the provider lengthens the wait, still
    /// bounded by `max_delay`. Non-transient errors return at once.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or
    /// [`ProviderError::RetriesExhausted`] once every attempt failed.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                return Err(EdgeweaveError::Provider(ProviderError::RetriesExhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                }));
            }

            let mut delay = self.delay_for_attempt(attempt - 1);
            if let Some(secs) = err.retry_after_secs() {
                delay = delay.max(Duration::from_secs(secs)).min(self.max_delay);
            }

            warn!(
                "{label}: attempt {attempt}/{} failed: {err}. Retrying in {}ms",
                self.max_attempts,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = fast_policy(3)
            .run("create url_map.web", || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EdgeweaveError::from(ProviderError::unavailable("503")))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = fast_policy(5)
            .run("create url_map.web", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(EdgeweaveError::from(ProviderError::rejected(400, "bad request"))) }
            })
            .await;

        assert!(matches!(
            result,
            Err(EdgeweaveError::Provider(ProviderError::Rejected { status: 400, .. }))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let result: Result<()> = fast_policy(3)
            .run("delete dns_record_set.www", || async {
                Err(EdgeweaveError::Provider(ProviderError::RateLimited {
                    retry_after_secs: 0,
                }))
            })
            .await;

        match result {
            Err(EdgeweaveError::Provider(ProviderError::RetriesExhausted {
                attempts,
                last_error,
            })) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("rate limited"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_after_is_bounded() {
        let start = std::time::Instant::now();
        let _: Result<()> = fast_policy(2)
            .run("create global_address.web", || async {
                Err(EdgeweaveError::Provider(ProviderError::RateLimited {
                    retry_after_secs: 60,
                }))
            })
            .await;
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
