//! Thundering-herd demo
//!
//! 100 concurrent callers ask for the same cold key while the backing
//! "database" takes 100ms per query. With single-flight coalescing the
//! database sees exactly one query; everyone shares its result.

use herd_cache::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cache = CacheAccessor::new(MemoryStore::new());
    let db_queries = Arc::new(AtomicU32::new(0));

    let concurrency = 100;
    let barrier = Arc::new(Barrier::new(concurrency));

    println!("Spawning {concurrency} concurrent requests for key 'DEMO-001'...");

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
                        // Simulated 100ms backing fetch
                        db_queries.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(100)).await;
                        Ok(Some("Premium Widget (DEMO-001)".to_string()))
                    },
                    Duration::from_secs(60),
                )
                .await
        }));
    }

    for handle in handles {
        let value = handle.await?.expect("request failed");
        assert_eq!(value.as_deref(), Some("Premium Widget (DEMO-001)"));
    }

    let queries = db_queries.load(Ordering::SeqCst);
    let metrics = cache.flight_metrics();

    println!("Backing fetches performed: {queries}");
    println!(
        "Coalescer: {} executions, {} deduplications ({:.1}% deduplicated)",
        metrics.executions, metrics.deduplications, metrics.dedup_ratio_percent
    );

    if queries != 1 {
        panic!("coalescing failed! expected 1 backing fetch, got {queries}");
    }
    println!("SUCCESS: the herd was reduced to a single backing fetch.");

    Ok(())
}
