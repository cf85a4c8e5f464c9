//! Redis-backed counter store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::CounterStore;
use crate::error::StoreError;

/// Increments KEYS[1] only if it exists; returns nil otherwise.
/// A bare INCR on an expired key would recreate it with no TTL.
const INCR_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCR', KEYS[1])
end
return false
"#;

/// Counter store backed by a Redis (or Redis-compatible) server.
///
/// Cloning is cheap and clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    incr_if_exists: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// Fails if the URL is invalid, the connection is not established within
    /// `connect_timeout`, or the server does not answer a `PING`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| {
            warn!(error = %e, "Failed to create Redis client");
            StoreError::Redis(e)
        })?;

        let connection_manager =
            tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    warn!(timeout = ?connect_timeout, "Timed out connecting to Redis");
                    StoreError::Unavailable(format!(
                        "connection not established within {:?}",
                        connect_timeout
                    ))
                })?
                .map_err(|e| {
                    warn!(error = %e, "Failed to create Redis connection manager");
                    StoreError::Redis(e)
                })?;

        let store = Self {
            connection_manager,
            incr_if_exists: Script::new(INCR_IF_EXISTS),
        };
        store.ping().await?;

        info!("Connected to Redis counter store");
        Ok(store)
    }

    /// Check that the server responds.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Largest `PX` value used. Redis rejects expiries whose absolute deadline
/// overflows a signed 64-bit millisecond clock.
const MAX_TTL_MILLIS: u64 = i64::MAX as u64 / 2;

/// TTL in milliseconds for `PX`, clamped to [`MAX_TTL_MILLIS`].
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .min(MAX_TTL_MILLIS)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        let found: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(found > 0)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await?;

        debug!(key = %key, value = value, ttl = ?ttl, "SET with expiry");
        Ok(())
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection_manager.clone();
        let value: Option<i64> = self
            .incr_if_exists
            .key(key)
            .invoke_async(&mut conn)
            .await?;

        value.ok_or_else(|| StoreError::MissingKey(key.to_string()))
    }
}
