//! Core traits for cache operations

mod metrics;
mod serializer;
mod store;

pub use metrics::{CacheMetrics, CacheOperation, NoopMetrics};
pub use serializer::{JsonSerializer, Serializer};
pub use store::KeyValueStore;

#[cfg(feature = "msgpack")]
pub use serializer::MsgPackSerializer;

#[cfg(feature = "bincode")]
pub use serializer::BincodeSerializer;

#[cfg(feature = "metrics")]
pub use metrics::MetricsCrateAdapter;
