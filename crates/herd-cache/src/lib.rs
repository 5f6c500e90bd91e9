//! herd-cache: Stampede-resistant caching for Rust
//!
//! # Features
//!
//! - **Single-flight coalescing**: one loader run per key, no matter how
//!   many callers miss concurrently
//! - **Jittered TTLs**: entries written together don't expire together
//! - **Probabilistic early refresh**: aging entries recompute in the
//!   background before they expire
//! - **Negative caching**: known-missing keys stop hammering the backing
//!   store
//! - **Stale-on-error fallback**: serve the last good value when a reload
//!   fails
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use herd_cache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let cache = CacheAccessor::new(MemoryStore::new());
//!
//!     let value = cache
//!         .get("user:42", || async {
//!             // expensive backing query goes here
//!             Ok(Some("Alice".to_string()))
//!         })
//!         .await?;
//!
//!     println!("loaded: {:?}", value);
//!     Ok(())
//! }
//! ```

mod accessor;
mod random;
pub mod single_flight;

// Re-export core
pub use herd_cache_core::*;

// Re-export storage
#[cfg(feature = "memory")]
pub use herd_cache_storage::{MemoryStore, StoreCounters};

#[cfg(feature = "redis")]
pub use herd_cache_storage::{RedisConfig, RedisStore};

// Export accessor and coalescer
pub use accessor::{CacheAccessor, CacheAccessorConfig};
pub use random::{FixedRandom, RandomSource, ThreadRngSource};
pub use single_flight::{FlightMetrics, SingleFlight};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CacheAccessor, CacheAccessorConfig, CacheError, CachedEntry, FlightMetrics,
        JsonSerializer, KeyValueStore, Result, Serializer, SingleFlight,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryStore;

    #[cfg(feature = "redis")]
    pub use crate::{RedisConfig, RedisStore};

    #[cfg(feature = "msgpack")]
    pub use crate::MsgPackSerializer;

    #[cfg(feature = "bincode")]
    pub use crate::BincodeSerializer;
}

#[cfg(test)]
mod tests;
