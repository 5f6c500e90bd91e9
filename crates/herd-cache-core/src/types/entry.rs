//! Cache entry type

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// The unit stored in and retrieved from the external key-value store
///
/// An entry is either a normal entry (`negative == false`, value meaningful)
/// or a negative entry (`negative == true`, value unused) recording that the
/// loader found nothing, so repeated lookups for missing keys can be answered
/// without touching the backing system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry<T> {
    /// The cached value; `None` for negative entries
    pub value: Option<T>,
    /// When the entry was written
    pub created_at: SystemTime,
    /// Marks a cached absence
    pub negative: bool,
}

impl<T> CachedEntry<T> {
    /// Create a normal entry holding `value`
    pub fn new(value: T) -> Self {
        Self {
            value: Some(value),
            created_at: SystemTime::now(),
            negative: false,
        }
    }

    /// Create a negative entry recording that the loader found nothing
    pub fn negative() -> Self {
        Self {
            value: None,
            created_at: SystemTime::now(),
            negative: true,
        }
    }

    /// Check whether this entry records a cached absence
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Time elapsed since the entry was written
    ///
    /// Clock skew (a `created_at` in the future) reads as zero age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    /// Extract the value, consuming the entry
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}
