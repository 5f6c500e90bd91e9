//! Read-through caching demo
//!
//! Shows the accessor's everyday surface: loading on miss, hits that skip
//! the loader, negative caching for missing keys, invalidation, and warming.

use herd_cache::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cache = CacheAccessor::new(MemoryStore::new());

    // 1. Cold read: the loader runs and its value is cached
    let value = cache
        .get("user:42", || async {
            println!("  -> loader queried the backing store");
            Ok(Some("Alice".to_string()))
        })
        .await?;
    println!("first read:  {value:?}");

    // 2. Warm read: the loader is never invoked
    let value = cache
        .get::<String, _, _>("user:42", || async {
            unreachable!("cache hit must not invoke the loader")
        })
        .await?;
    println!("second read: {value:?}");

    // 3. Missing key: the absence itself is cached
    let value = cache
        .get::<String, _, _>("user:999", || async {
            println!("  -> loader found nothing");
            Ok(None)
        })
        .await?;
    println!("missing key: {value:?}");

    let value = cache
        .get::<String, _, _>("user:999", || async {
            unreachable!("negative cache must not invoke the loader")
        })
        .await?;
    println!("negative hit: {value:?}");

    // 4. Invalidation forces the next read back to the loader
    cache.invalidate("user:42").await?;
    let value = cache
        .get("user:42", || async {
            println!("  -> loader queried the backing store again");
            Ok(Some("Alice v2".to_string()))
        })
        .await?;
    println!("after invalidate: {value:?}");

    // 5. Warming primes a key out of band
    cache
        .warm(
            "user:7",
            || async { Ok(Some("Bob".to_string())) },
            Duration::from_secs(60),
        )
        .await?;
    let value = cache
        .get::<String, _, _>("user:7", || async {
            unreachable!("warmed key must not invoke the loader")
        })
        .await?;
    println!("warmed read: {value:?}");

    Ok(())
}
