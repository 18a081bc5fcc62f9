//! Retry logic with exponential backoff and jitter.
//!
//! Used for re-sending tool invocations after transport failures and for
//! re-establishing lost server connections.

use std::future::Future;
use std::time::{Duration, Instant};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_attempts: u32,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 = double each time).
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays (prevents thundering herd).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries (fail fast).
    pub fn no_retry() -> Self {
        Self { max_attempts: 0, ..Default::default() }
    }

    /// Tool invocations: 3 attempts in total, 1s doubling up to 10s.
    pub fn invocation() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Reconnecting a lost server: 5 attempts in total, 1s doubling up to 30s.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Total number of attempts including the first one.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts + 1
    }

    /// Calculate the delay after `attempt` consecutive failures.
    ///
    /// Never shorter than `min(initial * multiplier^(attempt-1), max_delay)`;
    /// jitter only ever lengthens it.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add up to 25% jitter
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0) without external deps.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Result of a retry operation.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error).
    pub result: Result<T, E>,

    /// Number of attempts made.
    pub attempts: u32,

    /// Total time spent (including delays).
    pub total_time: Duration,

    /// Whether the operation was retried.
    pub was_retried: bool,
}

impl<T, E> RetryResult<T, E> {
    /// Check if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Get the result.
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Retry an async operation while `should_retry` accepts its error.
///
/// An error rejected by `should_retry` is returned immediately.
pub async fn retry_async_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let start = Instant::now();
    let mut attempts = 0;
    let max_attempts = config.total_attempts();

    loop {
        attempts += 1;
        let result = operation().await;

        let done = match result {
            Ok(_) => true,
            Err(ref e) => attempts >= max_attempts || !should_retry(e),
        };
        if done {
            return RetryResult {
                result,
                attempts,
                total_time: start.elapsed(),
                was_retried: attempts > 1,
            };
        }

        // Sleep before next attempt
        let delay = config.delay_for_attempt(attempts);
        tracing::debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Retrying after failure");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.jitter);
    }

    #[test]
    fn test_retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 0);
        assert_eq!(config.total_attempts(), 1);
    }

    #[test]
    fn test_invocation_preset() {
        let config = RetryConfig::invocation();
        assert_eq!(config.total_attempts(), 3);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_never_shortens_backoff() {
        let config = RetryConfig::reconnect();
        for n in 1..=8u32 {
            let floor = Duration::from_secs(2u64.pow(n - 1)).min(config.max_delay);
            let delay = config.delay_for_attempt(n);
            assert!(delay >= floor, "attempt {}: {:?} < {:?}", n, delay, floor);
            assert!(delay <= floor.mul_f64(1.25) + Duration::from_millis(1));
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let result = retry_async_if(&RetryConfig::default(), |_| true, || async { Ok::<_, &str>("success") }).await;

        assert!(result.is_ok());
        assert_eq!(result.attempts, 1);
        assert!(!result.was_retried);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_async_if(&fast(3), |_| true, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient error")
            } else {
                Ok("success")
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.attempts, 3);
        assert!(result.was_retried);
    }

    #[tokio::test]
    async fn test_retry_all_failures() {
        let result = retry_async_if(&fast(2), |_| true, || async { Err::<(), _>("persistent error") }).await;

        assert!(!result.is_ok());
        assert_eq!(result.attempts, 3); // 1 initial + 2 retries
        assert!(result.was_retried);
    }

    #[tokio::test]
    async fn test_retry_if_stops_on_rejected_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_async_if(
            &fast(5),
            |e: &&str| *e == "transient",
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err::<(), _>("transient")
                } else {
                    Err("fatal")
                }
            },
        )
        .await;

        assert_eq!(result.attempts, 2);
        assert_eq!(result.into_result(), Err("fatal"));
    }
}
