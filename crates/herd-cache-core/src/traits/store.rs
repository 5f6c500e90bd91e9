//! External key-value store trait

use crate::CacheError;
use async_trait::async_trait;
use std::time::Duration;

/// Narrow capability interface over the external key-value store
///
/// The store is the only durable shared resource: it holds serialized cache
/// entries with per-key expiry and is assumed to be internally synchronized.
/// Implementations include the in-memory store and Redis.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Fetch the raw bytes stored under `key`
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store raw bytes under `key`, expiring after `ttl`
    ///
    /// A later `get` must return the bytes intact until expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Delete a key from the store
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}
