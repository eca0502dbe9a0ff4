//! Error classification for the retry wrapper.
//!
//! Matching is done on the wrapped error chain's `Display` output,
//! case-insensitive substring — the core never inspects concrete RPC
//! client error types, since the RPC adapter is implementation
//! independent.

use crate::error::{AppError, DomainError, InfraError};

/// The outcome of classifying an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth retrying after backoff.
    Retryable,
    /// Must not be retried; surfaced immediately.
    NonRetryable,
}

const NETWORK_NEEDLES: &[&str] = &[
    "connection refused",
    "connection reset",
    "broken pipe",
    "dns",
    "network",
    "no route to host",
];

const TIMEOUT_NEEDLES: &[&str] = &["timeout", "timed out", "deadline exceeded"];

const RATE_LIMIT_NEEDLES: &[&str] = &["429", "too many requests", "rate limit"];

const TRANSIENT_SERVER_NEEDLES: &[&str] = &[
    "502",
    "503",
    "504",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];

const POOL_EXHAUSTION_NEEDLES: &[&str] = &["connection pool", "no available connection"];

/// Classify an `AppError` as retryable or not.
///
/// `DomainError::Cancelled` and `DomainError::ReorgDetected` are never
/// retryable — the driver handles them directly. `InfraError::StorageLocked`
/// is retryable (surfaced as a storage-locked condition elsewhere, but
/// the retry wrapper itself only wraps RPC calls so this mostly applies
/// to errors bubbling up through the same call path).
#[must_use]
pub fn classify_error(err: &AppError) -> RetryClass {
    match err {
        AppError::Domain(DomainError::Cancelled | DomainError::ReorgDetected { .. } | DomainError::ConfigInvalid(_)) => {
            RetryClass::NonRetryable
        }
        AppError::Infra(InfraError::StorageFatal(_)) => RetryClass::NonRetryable,
        AppError::Infra(InfraError::StorageLocked(_) | InfraError::PoolExhausted) => RetryClass::Retryable,
        AppError::Infra(infra) => classify_message(&infra.to_string()),
    }
}

fn classify_message(message: &str) -> RetryClass {
    let lower = message.to_lowercase();
    let matches_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if matches_any(NETWORK_NEEDLES)
        || matches_any(TIMEOUT_NEEDLES)
        || matches_any(RATE_LIMIT_NEEDLES)
        || matches_any(TRANSIENT_SERVER_NEEDLES)
        || matches_any(POOL_EXHAUSTION_NEEDLES)
    {
        RetryClass::Retryable
    } else {
        RetryClass::NonRetryable
    }
}
