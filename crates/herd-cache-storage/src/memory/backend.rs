//! In-memory key-value store using DashMap

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use herd_cache_core::{CacheError, KeyValueStore};

/// Operation counters for the memory store
#[derive(Debug, Clone, Default)]
pub struct StoreCounters {
    /// Number of reads that found a live value
    pub hits: u64,
    /// Number of reads that found nothing
    pub misses: u64,
    /// Number of writes
    pub writes: u64,
    /// Number of explicit deletes
    pub deletes: u64,
    /// Number of entries dropped because their expiry passed
    pub expirations: u64,
}

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// In-memory `KeyValueStore`
///
/// Backed by `DashMap` for concurrent access. Expiry is enforced lazily:
/// an expired value is dropped the next time its key is read. Deadlines use
/// the tokio clock, so tests running under `start_paused` can advance time
/// deterministically.
///
/// Cloning creates a new handle to the SAME underlying store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<DashMap<String, StoredValue>>,
    counters: Arc<RwLock<StoreCounters>>,
}

impl MemoryStore {
    /// Create a new, empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time before `key` expires
    ///
    /// Returns `None` if the key is absent or already expired. Used by tests
    /// to observe the effective (jittered) TTL of a stored entry.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let value = self.data.get(key)?;
        let now = Instant::now();
        if value.expires_at <= now {
            return None;
        }
        Some(value.expires_at - now)
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, value| value.expires_at > now);
        let removed = before - self.data.len();
        self.counters.write().expirations += removed as u64;
        removed
    }

    /// Snapshot of the operation counters
    pub fn counters(&self) -> StoreCounters {
        self.counters.read().clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.data.get(key) {
            Some(value) => {
                if value.expires_at <= Instant::now() {
                    drop(value);
                    self.data.remove(key);
                    let mut counters = self.counters.write();
                    counters.expirations += 1;
                    counters.misses += 1;
                    return Ok(None);
                }
                self.counters.write().hits += 1;
                Ok(Some(value.bytes.clone()))
            }
            None => {
                self.counters.write().misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let stored = StoredValue {
            bytes: value,
            expires_at: Instant::now() + ttl,
        };
        self.data.insert(key.to_string(), stored);
        self.counters.write().writes += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.data.remove(key).is_some();
        if removed {
            self.counters.write().deletes += 1;
        }
        Ok(removed)
    }
}
