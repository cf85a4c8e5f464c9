//! In-process counter store.
//!
//! Suitable for tests and single-instance deployments. Counters live in one
//! mutex-guarded map, so every operation is atomic across tasks in this
//! process but invisible to other processes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::CounterStore;
use crate::error::StoreError;

/// Map size below which inserts never trigger a sweep.
const MIN_SWEEP_THRESHOLD: usize = 64;

/// A counter with its expiry deadline.
#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: Instant,
}

impl Entry {
    fn new(value: i64, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now.checked_add(ttl).unwrap_or_else(|| far_future(now)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Roughly thirty years out; used when `now + ttl` overflows.
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86400 * 365 * 30)
}

#[derive(Debug)]
struct Entries {
    map: HashMap<String, Entry>,
    /// Map size at which the next insert sweeps expired entries
    sweep_at: usize,
}

impl Default for Entries {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            sweep_at: MIN_SWEEP_THRESHOLD,
        }
    }
}

impl Entries {
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, e| e.is_live(now));
        self.sweep_at = (self.map.len() * 2).max(MIN_SWEEP_THRESHOLD);
        before - self.map.len()
    }

    /// Insert, first sweeping expired entries once the map has doubled
    /// since the last sweep. Keeps the map within about twice the live set.
    fn insert(&mut self, key: &str, entry: Entry, now: Instant) {
        if self.map.len() >= self.sweep_at && !self.map.contains_key(key) {
            let removed = self.sweep(now);
            if removed > 0 {
                debug!(removed = removed, "Swept expired counters");
            }
        }
        self.map.insert(key.to_string(), entry);
    }
}

/// In-memory counter store with per-key expiry.
///
/// Expired entries are dropped when touched, swept as the map grows, or in
/// bulk by [`MemoryStore::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a live counter.
    pub fn get(&self, key: &str) -> Option<i64> {
        let now = Instant::now();
        self.entries
            .lock()
            .map
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value)
    }

    /// Remaining time to live of a live counter.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .map
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now)
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Whether there are no live counters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired counter and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let removed = self.entries.lock().sweep(Instant::now());

        if removed > 0 {
            debug!(removed = removed, "Purged expired counters");
        }
        removed
    }

    /// Entries held, live or expired.
    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.entries.lock().map.len()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).is_some())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        self.entries
            .lock()
            .insert(key, Entry::new(value, ttl), now);
        Ok(())
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.map.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }

        entries.insert(key, Entry::new(value, ttl), now);
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.map.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.value = entry
                    .value
                    .checked_add(1)
                    .ok_or_else(|| StoreError::Unavailable(format!("counter overflow: {}", key)))?;
                Ok(entry.value)
            }
            Some(_) => {
                entries.map.remove(key);
                Err(StoreError::MissingKey(key.to_string()))
            }
            None => Err(StoreError::MissingKey(key.to_string())),
        }
    }
}
