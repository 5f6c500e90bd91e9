//! herd-cache-storage: Key-value store backends for herd-cache

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryStore, StoreCounters};

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisStore};
