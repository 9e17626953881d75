//! Closed set of error kinds surfaced by every public operation.
//!
//! Mirrors the teacher's `enterprise::error::EnterpriseError` shape: one
//! `thiserror` variant per failure kind, a crate-wide `Result` alias, and
//! `#[from]` conversions at the boundaries we actually cross (SQLite, I/O).

use std::sync::Arc;

use thiserror::Error;

/// Errors produced by cache operations.
///
/// The set is closed by design: callers match on it exhaustively rather than
/// treating the cache as a source of arbitrary error strings.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The requested key (or type/key pair) does not exist or has expired.
    #[error("key not found")]
    NotFound,

    /// The cache (or its operation queue) has already been shut down.
    #[error("cache already disposed")]
    AlreadyDisposed,

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The configured `Serializer` failed to encode or decode a value.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Encryption, decryption, or key derivation failed.
    #[error("crypto operation failed: {0}")]
    CryptoFailed(String),

    /// The backing store (SQLite, filesystem) failed.
    #[error("storage operation failed: {0}")]
    StorageFailed(String),

    /// An HTTP fetch (e.g. `download_url`) failed.
    #[error("network operation failed: {0}")]
    NetworkFailed(String),

    /// Two operations could not be reconciled (e.g. coalescing conflict).
    #[error("conflicting operation: {0}")]
    Conflict(String),
}

/// Result alias used throughout the crate.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CacheError::NotFound,
            other => CacheError::StorageFailed(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::StorageFailed(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationFailed(err.to_string())
    }
}

/// Wraps a [`CacheError`] so it can be cheaply cloned and broadcast to every
/// original operation participating in a coalesced batch (`sqlx::Error` is
/// not `Clone`, so the queue converts to `CacheError` once and shares it).
pub type SharedCacheError = Arc<CacheError>;
