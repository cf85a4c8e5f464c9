//! Counter store backends.
//!
//! The rate limiter only needs three capabilities from its store: an
//! existence check, a create-with-expiry, and an atomic increment. A fourth,
//! conditional create, lets the limiter admit the first request of a window
//! exactly once. Counters expire on the store's clock; the limiter never
//! deletes them.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;

/// Trait for counter store implementations.
///
/// Implementations must make `increment` and `set_if_absent_with_expiry`
/// atomic with respect to every other caller of the same store, including
/// callers in other processes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Check whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Create or overwrite `key` with `value`, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: i64, ttl: Duration)
        -> Result<(), StoreError>;

    /// Create `key` with `value` and `ttl` only if it does not exist.
    ///
    /// Returns `true` if the key was created.
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Atomically add one to the integer at `key` and return the new value.
    ///
    /// Fails with [`StoreError::MissingKey`] if the key does not exist. The
    /// key's expiry is left untouched.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;
}

#[async_trait]
impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        (**self).set_with_expiry(key, value, ttl).await
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        (**self).set_if_absent_with_expiry(key, value, ttl).await
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        (**self).increment(key).await
    }
}
