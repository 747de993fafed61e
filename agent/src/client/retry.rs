//! Bounded retry with incremental backoff

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that may succeed when tried again
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay added per retry
    pub step: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step: Duration::from_millis(200),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based): step, 2*step, ... capped
    /// at `max_delay`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        self.step
            .saturating_mul(retry.max(1))
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retries are exhausted.
pub async fn run_with_retry<F, Fut, T, E>(
    operation: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut retry = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.backoff_delay(retry);
                warn!(
                    operation,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );
                sleep(delay).await;
            }
            Err(err) => {
                debug!(operation, retry, "Giving up");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Retryable,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Retryable => write!(f, "retryable"),
                TestError::Fatal => write!(f, "fatal"),
            }
        }
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Retryable)
        }
    }

    #[test]
    fn test_backoff_is_incremental_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = run_with_retry("test", &RetryPolicy::default(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Retryable)
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), TestError> =
            run_with_retry("test", &RetryPolicy::default(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Retryable)
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), TestError> =
            run_with_retry("test", &RetryPolicy::default(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            })
            .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
