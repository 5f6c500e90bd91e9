//! Stale-on-error fallback demo
//!
//! When a reload fails but an earlier value is still stored, the accessor
//! trades freshness for availability and serves the stale value instead of
//! surfacing the failure.
//!
//! A small store wrapper injects a transient read blip so the primary path
//! actually fails while a usable entry is still present.

use async_trait::async_trait;
use herd_cache::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Memory store that fails a set number of upcoming reads
#[derive(Clone)]
struct BlinkingStore {
    inner: MemoryStore,
    failing_reads: Arc<AtomicUsize>,
}

impl BlinkingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for BlinkingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let should_fail = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(CacheError::StoreUnavailable("transient blip".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let store = BlinkingStore::new();
    let cache = CacheAccessor::new(store.clone());

    // Populate the cache while everything is healthy
    let value = cache
        .get_with_ttl(
            "price:SKU-1",
            || async { Ok(Some(1999u64)) },
            Duration::from_secs(60),
        )
        .await?;
    println!("healthy load: {value:?}");

    // The store read blips AND the database is down: a plain get would
    // fail, but the stale re-read finds the previous entry and serves it.
    store.fail_next_reads(1);
    let value = cache
        .get_with_stale::<u64, _, _>(
            "price:SKU-1",
            || async { Err(CacheError::loader("database unreachable")) },
            Duration::from_secs(60),
        )
        .await?;
    println!("stale value served during outage: {value:?}");
    assert_eq!(value, Some(1999));

    // With nothing stored for a key, the failure propagates unchanged
    let err = cache
        .get_with_stale::<u64, _, _>(
            "price:SKU-2",
            || async { Err(CacheError::loader("database unreachable")) },
            Duration::from_secs(60),
        )
        .await
        .unwrap_err();
    println!("cold key during outage: {err}");

    Ok(())
}
