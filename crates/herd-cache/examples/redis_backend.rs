//! Redis-backed cache demo
//!
//! Run with: cargo run --example redis_backend --features redis
//! Requires a Redis server at redis://127.0.0.1:6379

use herd_cache::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RedisConfig::new("redis://127.0.0.1:6379").prefix("herd-demo");
    let store = RedisStore::new(config).await?;
    let cache = CacheAccessor::new(store);

    // Cold read goes to the loader; the entry lands in Redis with a
    // jittered expiry
    let value = cache
        .get_with_ttl(
            "greeting",
            || async { Ok(Some("hello from the loader".to_string())) },
            Duration::from_secs(60),
        )
        .await?;
    println!("first read:  {value:?}");

    // Served from Redis, loader untouched
    let value = cache
        .get_with_ttl::<String, _, _>(
            "greeting",
            || async { unreachable!("cache hit must not invoke the loader") },
            Duration::from_secs(60),
        )
        .await?;
    println!("second read: {value:?}");

    cache.invalidate("greeting").await?;
    println!("invalidated 'greeting'");

    Ok(())
}
