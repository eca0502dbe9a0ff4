//! Retry + backoff wrapper for RPC calls.
//!
//! A closure-retry loop: a driving loop that logs a warning per attempt
//! and an error on exhaustion, generalized to async operations,
//! cancellation-aware waits, jitter, and error classification by kind
//! rather than a caller-supplied trait impl.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{AppError, DomainError, InfraError};

mod classify;

pub use classify::{RetryClass, classify_error};

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Ceiling on any single backoff wait.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff delay after each retryable failure.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A config that executes the operation once, with no retry.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Backoff delay before attempt `k` (`k >= 2`, 1-indexed), before
    /// jitter: `min(initial * multiplier^(k-2), max)`.
    #[must_use]
    pub fn base_delay_for_attempt(&self, k: u32) -> Duration {
        if k < 2 {
            return Duration::ZERO;
        }
        let exponent = (k - 2) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()))
    }

    /// Apply uniform jitter in `[0.75, 1.25]` to a base delay.
    fn jittered(&self, base: Duration) -> Duration {
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}

/// Run `op` with classified retry and exponential backoff + jitter.
///
/// Attempt 1 runs immediately. Before each wait, `cancel` is checked;
/// if triggered, returns `DomainError::Cancelled` immediately. A
/// non-retryable error short-circuits without waiting. Exhausting all
/// attempts returns the last error.
///
/// # Errors
/// Returns the last observed error once `config.max_attempts` is
/// exhausted, a non-retryable error immediately, or
/// `DomainError::Cancelled` if `cancel` triggers while waiting.
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    op_name: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    let mut attempt: u32 = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(AppError::Domain(DomainError::Cancelled));
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = classify_error(&err);

                if class == RetryClass::NonRetryable {
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = config.max_attempts,
                        "non-retryable error on attempt {attempt}/{}",
                        config.max_attempts
                    );
                    return Err(err);
                }

                if attempt >= config.max_attempts {
                    error!(
                        op = op_name,
                        attempts = attempt,
                        "all {attempt} attempts failed (last error: {err})"
                    );
                    return Err(err);
                }

                let base = config.base_delay_for_attempt(attempt + 1);
                let delay = config.jittered(base);

                warn!(
                    op = op_name,
                    attempt,
                    ?delay,
                    "attempt {attempt}/{} failed with {class:?}, retrying in {delay:?}: {err}",
                    config.max_attempts
                );

                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {
                        return Err(AppError::Domain(DomainError::Cancelled));
                    }
                }

                attempt += 1;
            }
        }
    }
}

/// Extract the suggested `[from, to]` block range from a "too many
/// results" RPC error, if present.
///
/// Recognizes `Query returned more than N results. Try with this block
/// range [0x…, 0x…]`. Other providers' phrasings are not recognized;
/// extend this matcher as needed.
#[must_use]
pub fn parse_suggested_range(message: &str) -> Option<(u64, u64)> {
    let start = message.find("[0x")?;
    let rest = &message[start + 1..];
    let end = rest.find(']')?;
    let inner = &rest[..end];
    let mut parts = inner.split(',').map(str::trim);
    let from = parts.next()?.trim_start_matches("0x");
    let to = parts.next()?.trim_start_matches("0x");
    let from = u64::from_str_radix(from, 16).ok()?;
    let to = u64::from_str_radix(to, 16).ok()?;
    Some((from, to))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn err_503() -> AppError {
        AppError::Infra(InfraError::Rpc(Box::new(std::io::Error::other(
            "HTTP 503 service unavailable",
        ))))
    }

    fn err_config() -> AppError {
        AppError::Domain(DomainError::ConfigInvalid(vec!["bad".into()]))
    }

    #[tokio::test]
    async fn exhausts_all_attempts_on_persistent_retryable_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        };
        let cancel = CancellationToken::new();

        let result: Result<(), AppError> = retry(&config, "test_op", &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(err_503())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();

        let result: Result<(), AppError> = retry(&config, "test_op", &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(err_config())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        };
        let cancel = CancellationToken::new();

        let result: Result<u32, AppError> = retry(&config, "test_op", &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(err_503()) } else { Ok(n) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn null_retry_config_executes_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::none();
        let cancel = CancellationToken::new();

        let result: Result<(), AppError> = retry(&config, "test_op", &cancel, || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(err_503())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_before_first_wait() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), AppError> = retry(&config, "test_op", &cancel, || async { Err(err_503()) }).await;

        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::Cancelled))
        ));
    }

    #[test]
    fn backoff_sequence_follows_exponential_schedule() {
        let config = RetryConfig {
            max_attempts: 6,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        };
        let expected = [0.0, 1.0, 2.0, 4.0, 8.0, 16.0];
        for (k, exp) in (1..=6u32).zip(expected) {
            let actual = config.base_delay_for_attempt(k).as_secs_f64();
            assert!((actual - exp).abs() < 1e-9, "attempt {k}: {actual} != {exp}");
        }
    }

    #[test]
    fn parses_suggested_range_from_provider_error() {
        let msg = "Query returned more than 10000 results. Try with this block range [0x1, 0x2710]";
        assert_eq!(parse_suggested_range(msg), Some((1, 10000)));
    }

    #[test]
    fn parse_suggested_range_returns_none_for_unrelated_message() {
        assert_eq!(parse_suggested_range("connection reset by peer"), None);
    }
}
