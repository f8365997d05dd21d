//! Retry with exponential backoff for collaborator calls

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: usize = 5;
const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Bounded retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy; at least one attempt is always made
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts are used up. The last error is returned.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "Succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) if should_retry(&e) && attempt < self.max_attempts => {
                    let actual_delay = with_jitter(delay);
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        category = e.category(),
                        "Attempt failed, retrying in {:?}",
                        actual_delay
                    );
                    tokio::time::sleep(actual_delay).await;
                    delay = std::cmp::min(delay * 2, self.max_delay);
                    attempt += 1;
                }
                Err(e) => {
                    if should_retry(&e) {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Giving up after {} attempts",
                            attempt
                        );
                    } else {
                        debug!(operation = operation_name, error = %e, "Non-retryable error");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Whether an error is worth another attempt
pub fn should_retry(error: &Error) -> bool {
    error.is_retryable()
}

// Up to 10% either way so peers retrying together spread out.
fn with_jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as f64 * 0.1 * (rand::random::<f64>() * 2.0 - 1.0);
    let millis = (delay.as_millis() as f64 + spread).max(0.0);
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let result = quick(3).execute("op", || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_success_after_storage_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result = quick(5)
            .execute("publish", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::storage("ipfs returned 503"))
                    } else {
                        Ok("QmBlock")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "QmBlock");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = quick(3)
            .execute("publish", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::storage("unreachable")) }
            })
            .await;

        assert!(matches!(result, Err(Error::Storage { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = quick(5)
            .execute("commit", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::invariant("stale tip")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[test]
    fn test_jitter_stays_near_delay() {
        for _ in 0..100 {
            let d = with_jitter(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100));
        }
    }
}
