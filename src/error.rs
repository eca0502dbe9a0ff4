//! Layered error types for the indexing engine.
//!
//! - [`DomainError`] — business-logic failures the driver loop reacts to
//!   (reorgs, cancellation, invalid configuration).
//! - [`InfraError`] — infrastructure failures from the store, RPC adapter,
//!   and retry wrapper.
//! - [`AppError`] — top-level `Result` alias target, combining both.
//!
//! There is no HTTP-facing error layer here: the metrics/REST API surface
//! is an external collaborator that maps these errors on its own terms.

use thiserror::Error;

use crate::types::primitives::{BlockNumber, Digest};

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain-level errors the driver loop and reorg repair protocol handle
/// directly.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomainError {
    /// A reorg was detected while verifying stored fingerprints against
    /// the canonical chain.
    #[error(
        "reorg detected at block {first_block}: stored {stored_hash_prefix}, canonical {canonical_hash_prefix} (depth {depth})"
    )]
    ReorgDetected {
        /// Lowest block number where the divergence was observed.
        first_block: BlockNumber,
        /// Hex prefix of the previously stored hash at `first_block`.
        stored_hash_prefix: String,
        /// Hex prefix of the hash currently reported by the canonical chain.
        canonical_hash_prefix: String,
        /// Count of non-finalized blocks at or after `first_block`.
        depth: u64,
    },

    /// Configuration failed validation; carries every violation found,
    /// not just the first.
    #[error("invalid configuration: {}", .0.join("; "))]
    ConfigInvalid(Vec<String>),

    /// The cancellation signal was observed; this is never a fatal
    /// condition and always produces a clean exit.
    #[error("operation cancelled")]
    Cancelled,
}

impl DomainError {
    /// Construct a `ReorgDetected` error, truncating both hashes to an
    /// 8-character hex prefix for compact log lines.
    #[must_use]
    pub fn reorg_detected(first_block: BlockNumber, stored: Digest, canonical: Digest, depth: u64) -> Self {
        Self::ReorgDetected {
            first_block,
            stored_hash_prefix: stored.hex_prefix(8),
            canonical_hash_prefix: canonical.hex_prefix(8),
            depth,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from the embedded store, RPC adapter, and
/// retry wrapper.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Database error from the embedded SQLite store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// RPC error communicating with the chain peer.
    #[error("RPC error: {0}")]
    Rpc(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A raw log could not be decoded into the expected shape.
    #[error("event decoding error: {0}")]
    EventDecoding(String),

    /// Resource not found in storage.
    #[error("resource not found")]
    NotFound,

    /// Connection pool exhausted.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Timeout waiting for an operation to complete.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// `SQLITE_BUSY` was reported beyond the configured busy-timeout.
    /// Not fatal: retried at the next driver tick.
    #[error("storage locked: {0}")]
    StorageLocked(String),

    /// Unrecoverable storage failure (I/O error, corruption, schema
    /// mismatch). Propagates out of the driver, which closes resources
    /// and re-raises.
    #[error("fatal storage error: {0}")]
    StorageFatal(String),

    /// Configuration source error (file read / parse / env layering).
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl InfraError {
    /// True if the underlying `sqlx::Error` is a SQLite "database is
    /// locked" condition.
    #[must_use]
    pub fn is_storage_locked(&self) -> bool {
        matches!(self, Self::StorageLocked(_))
            || matches!(self, Self::Database(e) if e.to_string().to_lowercase().contains("database is locked"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Top-level error type used throughout the crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AppError {
    /// True for the one error kind that must never be treated as a
    /// process failure: cancellation never signals failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Domain(DomainError::Cancelled))
    }

    /// True for reorg-detected errors, which the driver routes to the
    /// repair protocol instead of treating as fatal.
    #[must_use]
    pub fn as_reorg(&self) -> Option<(BlockNumber, u64)> {
        match self {
            Self::Domain(DomainError::ReorgDetected {
                first_block, depth, ..
            }) => Some((*first_block, *depth)),
            _ => None,
        }
    }

    /// True for storage-fatal errors, which must unwind the driver and
    /// produce a non-zero exit code.
    #[must_use]
    pub fn is_storage_fatal(&self) -> bool {
        matches!(self, Self::Infra(InfraError::StorageFatal(_)))
    }
}

/// Type alias for crate-wide `Result`s.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Infra(InfraError::from(err))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
