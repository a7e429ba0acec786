//! Retry logic with exponential backoff
//!
//! Provides retry functionality for transient broker and registry failures.
//! Whether a failure is worth another attempt is a typed property of the
//! error ([`Retryable`]), not a message-format convention.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Classification consumed by [`retry_with_backoff`]
///
/// Transient failures (broker unreachable, registry down) are retried up to
/// the policy ceiling. Everything else fails fast: retrying a malformed
/// schema or an invalid payload can never succeed.
pub trait Retryable {
    /// Whether another attempt could plausibly succeed
    fn is_transient(&self) -> bool;
}

/// Configuration for retry behavior
///
/// The wait before the n-th re-attempt (0-based) is
/// `initial_retry_time * backoff_multiplier^n`, capped at `max_retry_time`.
/// `max_retries` counts re-attempts after the initial one, so an operation
/// runs at most `max_retries + 1` times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Wait before the first retry
    pub initial_retry_time: Duration,
    /// Growth factor per retry (values below 1.0 are treated as 1.0)
    pub backoff_multiplier: f64,
    /// Maximum wait between attempts, capping exponential growth
    pub max_retry_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_time: Duration::from_millis(300),
            backoff_multiplier: 2.0,
            max_retry_time: Duration::from_millis(3000),
        }
    }
}

impl RetryPolicy {
    /// Wait before the n-th retry (0-based)
    ///
    /// Never negative, never above `max_retry_time`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.max(1.0);
        let wait = self.initial_retry_time.as_millis() as f64 * multiplier.powf(f64::from(attempt));
        let capped = wait.min(self.max_retry_time.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Retry a fallible async operation with exponential backoff
///
/// Only transient errors are retried; a non-transient error is returned
/// immediately. When the ceiling is reached the last error is returned
/// unchanged.
///
/// # Arguments
/// * `operation` - The async operation to retry
/// * `policy` - Retry configuration
/// * `context` - Context string for logging (e.g., "register_schema")
///
/// # Example
/// ```rust
/// use event_broker::retry::{retry_with_backoff, Retryable, RetryPolicy};
///
/// #[derive(Debug)]
/// struct Unreachable;
///
/// impl std::fmt::Display for Unreachable {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "unreachable")
///     }
/// }
///
/// impl Retryable for Unreachable {
///     fn is_transient(&self) -> bool {
///         true
///     }
/// }
///
/// # async fn example() -> Result<(), Unreachable> {
/// let policy = RetryPolicy::default();
/// let value = retry_with_backoff(
///     || async { Ok::<_, Unreachable>(42) },
///     &policy,
///     "example_operation",
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    policy: &RetryPolicy,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display + Send,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        context = %context,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let wait = policy.backoff(attempt);
                warn!(
                    context = %context,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying with backoff"
                );
                sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(
                        context = %context,
                        attempts = attempt + 1,
                        error = %e,
                        "Operation failed after max retries"
                    );
                } else {
                    warn!(
                        context = %context,
                        attempts = attempt + 1,
                        error = %e,
                        "Operation failed with non-transient error"
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient(u32),
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestError::Transient(attempt) => write!(f, "transient failure {}", attempt),
                TestError::Fatal => write!(f, "fatal failure"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Transient(_))
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_retry_time: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_retry_time: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_retry_time: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_retry_time: Duration::from_millis(3000),
        };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(1600));
        // Capped from here on
        assert_eq!(policy.backoff(5), Duration::from_millis(3000));
        assert_eq!(policy.backoff(20), Duration::from_millis(3000));
    }

    #[test]
    fn test_backoff_multiplier_one_is_constant() {
        let policy = RetryPolicy {
            backoff_multiplier: 1.0,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.backoff(0), policy.backoff(7));
    }

    #[test]
    fn test_backoff_multiplier_below_one_is_clamped() {
        let policy = RetryPolicy {
            backoff_multiplier: 0.25,
            ..RetryPolicy::default()
        };

        // Clamped to 1.0: waits never shrink below the initial wait
        assert_eq!(policy.backoff(3), policy.initial_retry_time);
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let policy = fast_policy(3);
        let result = retry_with_backoff(
            || async { Ok::<_, TestError>(42) },
            &policy,
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let policy = fast_policy(3);
        let attempts = Arc::new(Mutex::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let mut count = attempts.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(TestError::Transient(*count))
                    } else {
                        Ok(42)
                    }
                }
            },
            &policy,
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_last_error() {
        let policy = fast_policy(2);
        let attempts = Arc::new(Mutex::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let mut count = attempts.lock().unwrap();
                    *count += 1;
                    Err::<i32, _>(TestError::Transient(*count))
                }
            },
            &policy,
            "test_operation",
        )
        .await;

        // Initial attempt plus two retries, last error surfaced
        assert_eq!(result, Err(TestError::Transient(3)));
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_fast() {
        let policy = fast_policy(5);
        let attempts = Arc::new(Mutex::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    *attempts.lock().unwrap() += 1;
                    Err::<i32, _>(TestError::Fatal)
                }
            },
            &policy,
            "test_operation",
        )
        .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exponential_backoff_timing() {
        let policy = fast_policy(3);
        let start = std::time::Instant::now();
        let attempts = Arc::new(Mutex::new(0));
        let attempts_clone = attempts.clone();

        let _result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let mut count = attempts.lock().unwrap();
                    *count += 1;
                    Err::<i32, _>(TestError::Transient(*count))
                }
            },
            &policy,
            "test_operation",
        )
        .await;

        let elapsed = start.elapsed();

        // Should have waited: 10ms + 20ms + 40ms = 70ms minimum
        assert!(elapsed >= Duration::from_millis(70));
        assert_eq!(*attempts.lock().unwrap(), 4);
    }
}
