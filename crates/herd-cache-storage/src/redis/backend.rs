//! Redis-backed key-value store

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;

use herd_cache_core::{CacheError, KeyValueStore};
use std::time::Duration;

use super::config::RedisConfig;

/// Redis `KeyValueStore`
///
/// Values are stored as raw byte strings with `SET EX`, so expiry is enforced
/// by Redis itself. Entry framing (creation timestamp, negative marker) lives
/// in the serialized bytes and passes through untouched.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
    config: RedisConfig,
}

impl RedisStore {
    /// Connect to Redis and build the connection pool
    pub async fn new(config: RedisConfig) -> Result<Self, CacheError> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;

        Ok(Self { pool, config })
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    async fn get_connection(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.get_connection().await?;
        let prefixed = self.prefixed_key(key);

        conn.get(&prefixed)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.get_connection().await?;
        let prefixed = self.prefixed_key(key);

        // Redis expiry granularity is whole seconds; SETEX rejects 0
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = conn
            .set_ex(&prefixed, value, ttl_secs)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.get_connection().await?;
        let prefixed = self.prefixed_key(key);

        let removed: u64 = conn
            .del(&prefixed)
            .await
            .map_err(|e| CacheError::StoreUnavailable(e.to_string()))?;
        Ok(removed > 0)
    }
}
