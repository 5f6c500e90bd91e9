//! Core types for cache operations

mod entry;

pub use entry::CachedEntry;
