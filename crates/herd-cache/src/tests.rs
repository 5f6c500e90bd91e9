//! Integration tests for the cache accessor

#[cfg(test)]
mod tests {
    use crate::FixedRandom;
    use crate::prelude::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};
    use tokio::sync::Barrier;
    use tokio::time::sleep;

    /// Accessor with deterministic randomness: no jitter, no early refresh
    fn quiet_cache(store: MemoryStore) -> CacheAccessor<MemoryStore> {
        CacheAccessor::new(store).with_random_source(FixedRandom::new(1.0, 0))
    }

    /// Store wrapper that fails a set number of upcoming reads, or all
    /// writes, to exercise the fail-open paths
    #[derive(Clone)]
    struct FlakyStore {
        inner: MemoryStore,
        failing_reads: Arc<AtomicUsize>,
        failing_writes: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                failing_reads: Arc::new(AtomicUsize::new(0)),
                failing_writes: Arc::new(AtomicBool::new(false)),
            }
        }

        fn fail_next_reads(&self, count: usize) {
            self.failing_reads.store(count, Ordering::SeqCst);
        }

        fn fail_writes(&self, fail: bool) {
            self.failing_writes.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let should_fail = self
                .failing_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(CacheError::StoreUnavailable("injected read failure".into()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
            if self.failing_writes.load(Ordering::SeqCst) {
                return Err(CacheError::StoreUnavailable("injected write failure".into()));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_cache_hit_suppresses_loader() {
        let cache = quiet_cache(MemoryStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let first = {
            let calls = Arc::clone(&calls);
            cache
                .get("product:1", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("first".to_string()))
                })
                .await
                .unwrap()
        };
        assert_eq!(first.as_deref(), Some("first"));

        // A different loader must not run; the cached value wins
        let second = {
            let calls = Arc::clone(&calls);
            cache
                .get("product:1", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("second".to_string()))
                })
                .await
                .unwrap()
        };
        assert_eq!(second.as_deref(), Some("first"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_negative_caching_suppresses_later_loaders() {
        let cache = quiet_cache(MemoryStore::new());

        let first = cache
            .get::<String, _, _>("missing", || async { Ok(None) })
            .await
            .unwrap();
        assert!(first.is_none());

        // The loader would find a value now, but the negative entry answers
        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get("missing", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("found".to_string()))
                })
                .await
                .unwrap();
            assert!(value.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cache.invalidate("missing").await.unwrap();

        let value = cache
            .get("missing", || async { Ok(Some("found".to_string())) })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("found"));
    }

    #[tokio::test]
    async fn test_invalidation_forces_reload() {
        let cache = quiet_cache(MemoryStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            cache
                .get("sku", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("value".to_string()))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate("sku").await.unwrap();

        let calls_after = Arc::clone(&calls);
        cache
            .get("sku", move || async move {
                calls_after.fetch_add(1, Ordering::SeqCst);
                Ok(Some("value".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_jittered_ttl_stays_in_bounds() {
        let store = MemoryStore::new();
        let cache = CacheAccessor::new(store.clone());

        for i in 0..20 {
            let key = format!("jitter:{i}");
            cache
                .get_with_ttl(
                    &key,
                    move || async move { Ok(Some(format!("value{i}"))) },
                    Duration::from_secs(60),
                )
                .await
                .unwrap();

            let remaining = store.ttl_remaining(&key).unwrap().as_secs_f64();
            assert!(
                remaining > 47.0 && remaining <= 72.0,
                "effective ttl out of bounds: {remaining}"
            );
        }
    }

    #[tokio::test]
    async fn test_jitter_extremes_are_inclusive() {
        let store = MemoryStore::new();
        let cache = CacheAccessor::new(store.clone()).with_random_source(FixedRandom::new(1.0, 12));
        cache
            .get_with_ttl(
                "high",
                || async { Ok(Some("v".to_string())) },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let remaining = store.ttl_remaining("high").unwrap().as_secs_f64();
        assert!(remaining > 71.0 && remaining <= 72.0);

        let cache =
            CacheAccessor::new(store.clone()).with_random_source(FixedRandom::new(1.0, -12));
        cache
            .get_with_ttl(
                "low",
                || async { Ok(Some("v".to_string())) },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let remaining = store.ttl_remaining("low").unwrap().as_secs_f64();
        assert!(remaining > 47.0 && remaining <= 48.0);
    }

    #[tokio::test]
    async fn test_negative_entry_uses_negative_ttl() {
        let store = MemoryStore::new();
        let config = CacheAccessorConfig::default().negative_ttl(Duration::from_secs(30));
        let cache = CacheAccessor::with_config(store.clone(), config)
            .with_random_source(FixedRandom::new(1.0, 0));

        cache
            .get::<String, _, _>("missing", || async { Ok(None) })
            .await
            .unwrap();

        let remaining = store.ttl_remaining("missing").unwrap().as_secs_f64();
        assert!(remaining > 29.0 && remaining <= 30.0);
    }

    #[tokio::test]
    async fn test_default_ttl_applied_by_get() {
        let store = MemoryStore::new();
        let config = CacheAccessorConfig::with_ttl(Duration::from_secs(120));
        let cache = CacheAccessor::with_config(store.clone(), config)
            .with_random_source(FixedRandom::new(1.0, 0));

        cache
            .get("sku", || async { Ok(Some("value".to_string())) })
            .await
            .unwrap();

        let remaining = store.ttl_remaining("sku").unwrap().as_secs_f64();
        assert!(remaining > 119.0 && remaining <= 120.0);
    }

    #[tokio::test]
    async fn test_store_read_failure_fails_open_to_loader() {
        let store = FlakyStore::new();
        let cache = CacheAccessor::new(store.clone()).with_random_source(FixedRandom::new(1.0, 0));

        cache
            .get("sku", || async { Ok(Some("cached".to_string())) })
            .await
            .unwrap();

        // The cached entry is unreadable for one call; the loader recomputes
        store.fail_next_reads(1);
        let calls = Arc::new(AtomicU32::new(0));
        let value = {
            let calls = Arc::clone(&calls);
            cache
                .get("sku", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("recomputed".to_string()))
                })
                .await
                .unwrap()
        };
        assert_eq!(value.as_deref(), Some("recomputed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_write_failure_still_returns_value() {
        let store = FlakyStore::new();
        let cache = CacheAccessor::new(store.clone()).with_random_source(FixedRandom::new(1.0, 0));

        store.fail_writes(true);
        let value = cache
            .get("sku", || async { Ok(Some("unpersisted".to_string())) })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("unpersisted"));

        // Nothing reached the store, so the next read loads again
        store.fail_writes(false);
        let calls = Arc::new(AtomicU32::new(0));
        let value = {
            let calls = Arc::clone(&calls);
            cache
                .get("sku", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("persisted".to_string()))
                })
                .await
                .unwrap()
        };
        assert_eq!(value.as_deref(), Some("persisted"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_failure_writes_nothing() {
        let store = MemoryStore::new();
        let cache = quiet_cache(store.clone());

        let err = cache
            .get::<String, _, _>("sku", || async { Err(CacheError::loader("db down")) })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Loader(_)));
        assert!(store.is_empty());

        // No negative entry either: the next call tries the loader again
        let value = cache
            .get("sku", || async { Ok(Some("recovered".to_string())) })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn test_stale_fallback_serves_previous_value() {
        let store = FlakyStore::new();
        let cache = CacheAccessor::new(store.clone()).with_random_source(FixedRandom::new(1.0, 0));

        cache
            .get_with_ttl(
                "sku",
                || async { Ok(Some("fresh".to_string())) },
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        // Primary read fails (miss), the loader fails too; the stale
        // re-read finds the previous entry and downgrades the failure
        store.fail_next_reads(1);
        let value = cache
            .get_with_stale::<String, _, _>(
                "sku",
                || async { Err(CacheError::loader("db down")) },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_stale_fallback_without_entry_propagates() {
        let cache = quiet_cache(MemoryStore::new());

        let err = cache
            .get_with_stale::<String, _, _>(
                "absent",
                || async { Err(CacheError::loader("db down")) },
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Loader(_)));
    }

    #[tokio::test]
    async fn test_stale_fallback_ignores_negative_entries() {
        let store = FlakyStore::new();
        let cache = CacheAccessor::new(store.clone()).with_random_source(FixedRandom::new(1.0, 0));

        // Only a negative entry is stored for this key
        cache
            .get::<String, _, _>("missing", || async { Ok(None) })
            .await
            .unwrap();

        // Primary read fails, loader fails; the stale re-read sees the
        // negative entry, which is not a usable stale value
        store.fail_next_reads(1);
        let err = cache
            .get_with_stale::<String, _, _>(
                "missing",
                || async { Err(CacheError::loader("db down")) },
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Loader(_)));
    }

    #[tokio::test]
    async fn test_warm_populates_with_exact_ttl() {
        let store = MemoryStore::new();
        let cache = quiet_cache(store.clone());

        cache
            .warm(
                "sku",
                || async { Ok(Some("warmed".to_string())) },
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let remaining = store.ttl_remaining("sku").unwrap().as_secs_f64();
        assert!(remaining > 59.0 && remaining <= 60.0);

        let calls = Arc::new(AtomicU32::new(0));
        let value = {
            let calls = Arc::clone(&calls);
            cache
                .get("sku", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("other".to_string()))
                })
                .await
                .unwrap()
        };
        assert_eq!(value.as_deref(), Some("warmed"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_warm_with_absent_value_writes_nothing() {
        let store = MemoryStore::new();
        let cache = quiet_cache(store.clone());

        cache
            .warm::<String, _, _>("sku", || async { Ok(None) }, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_probabilistic_refresh_updates_entry_in_background() {
        let store = MemoryStore::new();
        // unit draw of 0.0 triggers refresh whenever the probability is
        // positive; the entry below is 30s into a 60s TTL, so p = 1.0
        let cache = CacheAccessor::new(store.clone()).with_random_source(FixedRandom::new(0.0, 0));

        let mut entry = CachedEntry::new("old".to_string());
        entry.created_at = SystemTime::now() - Duration::from_secs(30);
        let bytes = JsonSerializer.serialize(&entry).unwrap();
        store.set("sku", bytes, Duration::from_secs(60)).await.unwrap();

        let refreshes = Arc::new(AtomicU32::new(0));
        let value = {
            let refreshes = Arc::clone(&refreshes);
            cache
                .get_with_ttl(
                    "sku",
                    move || async move {
                        refreshes.fetch_add(1, Ordering::SeqCst);
                        Ok(Some("new".to_string()))
                    },
                    Duration::from_secs(60),
                )
                .await
                .unwrap()
        };
        // The read path returns the still-valid value without blocking
        assert_eq!(value.as_deref(), Some("old"));

        let mut updated = false;
        for _ in 0..200 {
            let bytes = store.get("sku").await.unwrap().unwrap();
            let entry: CachedEntry<String> = JsonSerializer.deserialize(&bytes).unwrap();
            if entry.value.as_deref() == Some("new") {
                updated = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(updated, "background refresh never landed");
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_never_refreshed() {
        let store = MemoryStore::new();
        let cache = CacheAccessor::new(store.clone()).with_random_source(FixedRandom::new(0.0, 0));

        // Zero age exactly: the refresh probability is zero even against a
        // unit draw of 0.0
        let mut entry = CachedEntry::new("current".to_string());
        entry.created_at = SystemTime::now() + Duration::from_secs(5);
        let bytes = JsonSerializer.serialize(&entry).unwrap();
        store.set("sku", bytes, Duration::from_secs(60)).await.unwrap();

        let refreshes = Arc::new(AtomicU32::new(0));
        let value = {
            let refreshes = Arc::clone(&refreshes);
            cache
                .get_with_ttl(
                    "sku",
                    move || async move {
                        refreshes.fetch_add(1, Ordering::SeqCst);
                        Ok(Some("refreshed".to_string()))
                    },
                    Duration::from_secs(60),
                )
                .await
                .unwrap()
        };
        assert_eq!(value.as_deref(), Some("current"));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_timeout_is_independent() {
        let config = CacheAccessorConfig::default().flight_timeout(Duration::from_millis(50));
        let cache = CacheAccessor::with_config(MemoryStore::new(), config)
            .with_random_source(FixedRandom::new(1.0, 0));

        let leader = tokio::spawn({
            let cache = cache.clone();
            async move {
                cache
                    .get_with_ttl(
                        "slow",
                        || async {
                            sleep(Duration::from_millis(500)).await;
                            Ok(Some(1u32))
                        },
                        Duration::from_secs(60),
                    )
                    .await
            }
        });

        sleep(Duration::from_millis(1)).await;

        let err = cache
            .get_with_ttl::<u32, _, _>("slow", || async { Ok(Some(2)) }, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Timeout));

        // The executor is unaffected by the waiter's timeout
        assert_eq!(leader.await.unwrap().unwrap(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loader_failure_fans_out_to_waiters() {
        let cache = quiet_cache(MemoryStore::new());

        let leader = tokio::spawn({
            let cache = cache.clone();
            async move {
                cache
                    .get_with_ttl::<String, _, _>(
                        "sku",
                        || async {
                            sleep(Duration::from_millis(50)).await;
                            Err(CacheError::loader("db down"))
                        },
                        Duration::from_secs(60),
                    )
                    .await
            }
        });

        sleep(Duration::from_millis(1)).await;

        let waiter_err = cache
            .get_with_ttl::<String, _, _>(
                "sku",
                || async { Ok(Some("unused".to_string())) },
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();

        let leader_err = leader.await.unwrap().unwrap_err();
        assert!(matches!(leader_err, CacheError::Loader(_)));
        assert!(matches!(waiter_err, CacheError::Execution(_)));
        assert_eq!(
            waiter_err.execution_cause().to_string(),
            "loader failed: db down"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_hundred_concurrent_callers_one_backing_fetch() {
        let concurrency = 100;
        let cache = quiet_cache(MemoryStore::new());
        let db_queries = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(concurrency));

        let mut handles = Vec::new();
        for _ in 0..concurrency {
            let cache = cache.clone();
            let db_queries = Arc::clone(&db_queries);
            let barrier = Arc::clone(&barrier);

            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cache
                    .get_with_ttl(
                        "DEMO-001",
                        move || async move {
                            db_queries.fetch_add(1, Ordering::SeqCst);
                            sleep(Duration::from_millis(100)).await;
                            Ok(Some("PRODUCT-DEMO-001".to_string()))
                        },
                        Duration::from_secs(60),
                    )
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value.as_deref(), Some("PRODUCT-DEMO-001"));
        }

        assert_eq!(db_queries.load(Ordering::SeqCst), 1);
        assert_eq!(cache.flight_metrics().executions, 1);
    }

    #[tokio::test]
    async fn test_flight_metrics_reset() {
        let cache = quiet_cache(MemoryStore::new());

        cache
            .get("sku", || async { Ok(Some("value".to_string())) })
            .await
            .unwrap();
        assert_eq!(cache.flight_metrics().executions, 1);

        cache.reset_flight_metrics();
        let metrics = cache.flight_metrics();
        assert_eq!(metrics.executions, 0);
        assert_eq!(metrics.deduplications, 0);
        assert_eq!(metrics.dedup_ratio_percent, 0.0);
    }

    #[tokio::test]
    async fn test_struct_values_roundtrip() {
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Product {
            sku: String,
            name: String,
            price_cents: u64,
        }

        let cache = quiet_cache(MemoryStore::new());
        let product = Product {
            sku: "SKU-001".to_string(),
            name: "Widget".to_string(),
            price_cents: 1999,
        };

        let loaded = {
            let product = product.clone();
            cache
                .get("product:SKU-001", move || async move { Ok(Some(product)) })
                .await
                .unwrap()
        };
        assert_eq!(loaded, Some(product.clone()));

        // Second read comes from the store, decoded from stored bytes
        let cached = cache
            .get::<Product, _, _>("product:SKU-001", || async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(cached, Some(product));
    }
}
