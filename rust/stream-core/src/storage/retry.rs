// rust/stream-core/src/storage/retry.rs

//! Backoff policy for remote storage requests.
//!
//! Only transient object-store failures are retried here. Whole-shard
//! retries (a failed prefetch re-fetched synchronously) are a stream-level
//! decision and live in the prefetcher.

use std::future::Future;
use std::time::Duration;

use crate::config::S3Config;

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&S3Config> for RetryConfig {
    fn from(s3_config: &S3Config) -> Self {
        Self {
            max_retries: s3_config.max_retries,
            initial_delay: Duration::from_millis(s3_config.retry_delay_ms),
            max_delay: Duration::from_millis(s3_config.max_retry_delay_ms),
            ..Default::default()
        }
    }
}

impl RetryConfig {
    /// No retries at all; the first failure is final.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            Duration::from_secs_f64(capped * (1.0 + jitter_fraction(attempt) * 0.25))
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

// LCG seeded by the attempt number, in [0, 1)
fn jitter_fraction(seed: u32) -> f64 {
    let x = seed.wrapping_mul(1103515245).wrapping_add(12345);
    (x as f64) / (u32::MAX as f64 + 1.0)
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Ok(T),
    /// Transient failure, worth another attempt.
    Retry(E),
    /// Permanent failure.
    Fail(E),
}

/// Runs `operation` until it succeeds, fails permanently, or retries run out.
pub async fn retry_async<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryResult<T, E>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            RetryResult::Ok(value) => return Ok(value),
            RetryResult::Fail(error) => return Err(error),
            RetryResult::Retry(error) => {
                if !config.should_retry(attempt) {
                    return Err(error);
                }

                let delay = config.delay_for_attempt(attempt);
                tracing::debug!(attempt, ?delay, "retrying storage request");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    #[test]
    fn test_no_retry() {
        let config = RetryConfig::no_retry();
        assert!(!config.should_retry(0));
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig::default();
        let delay = config.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn test_from_s3_config() {
        let s3_config = S3Config {
            max_retries: 3,
            retry_delay_ms: 200,
            max_retry_delay_ms: 5000,
            ..Default::default()
        };

        let retry = RetryConfig::from(&s3_config);
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.initial_delay, Duration::from_millis(200));
        assert_eq!(retry.max_delay, Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_retry_eventually_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = retry_async(&fast(5), || {
            let count = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    RetryResult::Retry("not yet")
                } else {
                    RetryResult::Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_failure() {
        let attempts = AtomicU32::new(0);
        let result = retry_async(&fast(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { RetryResult::Fail::<i32, _>("not found") }
        })
        .await;

        assert_eq!(result, Err("not found"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let attempts = AtomicU32::new(0);
        let result = retry_async(&fast(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { RetryResult::Retry::<i32, _>("always fails") }
        })
        .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
