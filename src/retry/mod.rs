use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::config::AppConfig;
use crate::{Result, VideoError};

/// Explicit retry policy applied to every external call
///
/// Replaces ad hoc per-call retry loops with one testable object: bounded
/// attempts, an exponential backoff curve with a cap, and a per-attempt
/// timeout that counts as a retryable failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles each retry
    pub base_delay: Duration,

    /// Upper bound on any single backoff wait
    pub max_delay: Duration,

    /// Per-attempt timeout for the wrapped operation
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Build the run-wide policy from application settings
    pub fn from_config(app: &AppConfig) -> Self {
        Self {
            max_attempts: app.max_attempts,
            attempt_timeout: Duration::from_secs(app.request_timeout_secs),
            ..Self::default()
        }
    }

    /// Backoff delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` under this policy
    ///
    /// Retries only errors where `VideoError::is_retryable()` holds; a
    /// non-retryable error aborts immediately so the caller can move to its
    /// fallback chain. A timed-out attempt is treated as a transient
    /// network failure.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = VideoError::BackendUnavailable {
            backend: label.to_string(),
            message: "no attempts made".to_string(),
        };

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.delay_for(attempt - 1);
                tracing::debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    label,
                    delay,
                    attempt + 1,
                    self.max_attempts
                );
                sleep(delay).await;
            }

            match timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.is_retryable() => {
                    tracing::warn!("{} attempt {} failed: {}", label, attempt + 1, err);
                    last_error = err;
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    tracing::warn!(
                        "{} attempt {} timed out after {:?}",
                        label,
                        attempt + 1,
                        self.attempt_timeout
                    );
                    last_error = VideoError::Network {
                        backend: label.to_string(),
                        message: format!("attempt timed out after {:?}", self.attempt_timeout),
                    };
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn rate_limited() -> VideoError {
        VideoError::RateLimited {
            backend: "test".into(),
            message: "slow down".into(),
        }
    }

    #[test]
    fn test_backoff_curve_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("test", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(rate_limited())
                } else {
                    Ok(42u32)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_on_retryable_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = fast_policy(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            })
            .await;

        assert!(matches!(result, Err(VideoError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = fast_policy(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VideoError::Configuration("bad key".into()))
            })
            .await;

        assert!(matches!(result, Err(VideoError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_millis(10),
        };

        let calls = AtomicU32::new(0);
        let result: Result<u32> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(VideoError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
