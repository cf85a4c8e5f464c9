//! Error types for Tollgate.

use thiserror::Error;

/// Failure reported by a counter store.
///
/// Every variant means the same thing to the rate limiter: the store could
/// not answer, so the decision is indeterminate.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// An increment targeted a key that does not exist (or has expired)
    #[error("Key not found: {0}")]
    MissingKey(String),

    /// Errors returned by the Redis client
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
