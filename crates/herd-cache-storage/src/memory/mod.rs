//! In-memory key-value store

mod backend;

pub use backend::{MemoryStore, StoreCounters};
