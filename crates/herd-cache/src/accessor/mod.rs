//! Stampede-resistant cache accessor
//!
//! Read-through caching over an external key-value store, built on the
//! single-flight coalescer: concurrent misses for a key trigger exactly one
//! load, jittered TTLs desynchronize expiries, probabilistic early refresh
//! recomputes aging entries in the background, and negative entries shield
//! the backing system from repeated lookups of missing keys.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use herd_cache_core::{
    CacheMetrics, CacheOperation, CachedEntry, JsonSerializer, KeyValueStore, NoopMetrics, Result,
    Serializer,
};

use crate::random::{RandomSource, ThreadRngSource};
use crate::single_flight::{FlightMetrics, SingleFlight};

/// Configuration for [`CacheAccessor`]
#[derive(Debug, Clone)]
pub struct CacheAccessorConfig {
    /// TTL used by [`CacheAccessor::get`] when the caller names none
    pub default_ttl: Duration,
    /// TTL jitter as a percentage of the nominal TTL (0–100)
    pub jitter_percentage: u32,
    /// Early-refresh aggressiveness; refresh probability is
    /// `beta * age / ttl`, so values above 1 refresh before expiry
    pub beta: f64,
    /// TTL for negative (known-missing) entries
    pub negative_ttl: Duration,
    /// Bound on how long a coalesced waiter blocks on another caller's load
    pub flight_timeout: Duration,
}

impl Default for CacheAccessorConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            jitter_percentage: 20,
            beta: 2.0,
            negative_ttl: Duration::from_secs(60),
            flight_timeout: Duration::from_secs(10),
        }
    }
}

impl CacheAccessorConfig {
    /// Create config with a specific default TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            default_ttl: ttl,
            ..Default::default()
        }
    }

    /// Disable TTL jitter
    pub fn no_jitter(mut self) -> Self {
        self.jitter_percentage = 0;
        self
    }

    /// Set the early-refresh aggressiveness factor
    pub fn beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Set the negative-cache TTL
    pub fn negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    /// Set the coalesced-waiter timeout
    pub fn flight_timeout(mut self, timeout: Duration) -> Self {
        self.flight_timeout = timeout;
        self
    }
}

/// Refresh probability for an entry of `age` against the nominal `ttl`
///
/// Zero for a freshly written entry, rising linearly to `beta` as the entry
/// ages toward the nominal TTL. The nominal TTL calibrates the ramp; the
/// stored expiry is jittered separately.
pub(crate) fn refresh_probability(beta: f64, age: Duration, ttl: Duration) -> f64 {
    beta * (age.as_secs_f64() / ttl.as_secs_f64())
}

/// Read-through cache over an external key-value store
///
/// Generic over:
/// - `S`: the key-value store (Memory, Redis)
/// - `Z`: the serializer (JSON, MessagePack, Bincode)
/// - `M`: the metrics collector
///
/// The accessor owns no cache state itself; durable values live in the
/// store as serialized [`CachedEntry`] bytes. Cloning creates a new handle
/// to the SAME store and in-flight registry.
pub struct CacheAccessor<S, Z = JsonSerializer, M = NoopMetrics>
where
    S: KeyValueStore,
    Z: Serializer,
    M: CacheMetrics,
{
    store: Arc<S>,
    serializer: Arc<Z>,
    metrics: Arc<M>,
    random: Arc<dyn RandomSource>,
    config: CacheAccessorConfig,
    flights: SingleFlight<Option<Vec<u8>>>,
}

// Constructors for default serializer/metrics
impl<S: KeyValueStore> CacheAccessor<S> {
    /// Create an accessor with default JSON serializer and no metrics
    pub fn new(store: S) -> Self {
        Self::with_config(store, CacheAccessorConfig::default())
    }

    /// Create with custom config
    pub fn with_config(store: S, config: CacheAccessorConfig) -> Self {
        Self {
            store: Arc::new(store),
            serializer: Arc::new(JsonSerializer),
            metrics: Arc::new(NoopMetrics),
            random: Arc::new(ThreadRngSource),
            config,
            flights: SingleFlight::new(),
        }
    }
}

impl<S, Z, M> CacheAccessor<S, Z, M>
where
    S: KeyValueStore,
    Z: Serializer,
    M: CacheMetrics,
{
    /// Create an accessor with custom serializer and metrics
    pub fn with_serializer_and_metrics(
        store: S,
        serializer: Z,
        metrics: M,
        config: CacheAccessorConfig,
    ) -> Self {
        Self {
            store: Arc::new(store),
            serializer: Arc::new(serializer),
            metrics: Arc::new(metrics),
            random: Arc::new(ThreadRngSource),
            config,
            flights: SingleFlight::new(),
        }
    }

    /// Replace the randomness source (deterministic tests, custom tuning)
    pub fn with_random_source(mut self, random: impl RandomSource) -> Self {
        self.random = Arc::new(random);
        self
    }

    /// The active configuration
    pub fn config(&self) -> &CacheAccessorConfig {
        &self.config
    }

    /// Counters from the underlying single-flight coalescer
    pub fn flight_metrics(&self) -> FlightMetrics {
        self.flights.metrics()
    }

    /// Zero the single-flight counters
    pub fn reset_flight_metrics(&self) {
        self.flights.reset_metrics()
    }

    /// Get a value, loading and caching it on miss, with the default TTL
    pub async fn get<V, F, Fut>(&self, key: &str, loader: F) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        self.get_with_ttl(key, loader, self.config.default_ttl).await
    }

    /// Get a value, loading and caching it on miss
    ///
    /// - A negative entry answers `Ok(None)` without invoking `loader`.
    /// - A live entry is returned immediately; with probability
    ///   `beta * age / ttl` a background refresh is scheduled first.
    /// - A miss delegates to the single-flight coalescer so exactly one
    ///   concurrent miss runs `loader`; a loader returning `None` writes a
    ///   negative entry, a value writes a normal entry under a jittered TTL,
    ///   and a failure reaches every coalesced caller with nothing written.
    pub async fn get_with_ttl<V, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        let start = Instant::now();

        match self.fetch_entry::<V>(key).await {
            Some(entry) => {
                let result = if entry.is_negative() {
                    debug!(key = %key, "negative cache hit");
                    self.metrics.record_negative_hit(key);
                    Ok(None)
                } else {
                    if self.should_refresh_early(entry.age(), ttl) {
                        debug!(key = %key, "triggering probabilistic refresh");
                        self.metrics.record_refresh(key);
                        self.spawn_refresh(key, loader, ttl);
                    }
                    self.metrics.record_hit(key);
                    Ok(entry.value)
                };
                self.metrics
                    .record_latency(CacheOperation::Get, start.elapsed());
                result
            }
            None => {
                self.metrics.record_miss(key);
                let result = self.load_coalesced(key, loader, ttl).await;
                self.metrics
                    .record_latency(CacheOperation::Get, start.elapsed());
                result
            }
        }
    }

    /// [`get_with_ttl`](Self::get_with_ttl), downgrading a failed load to a
    /// stale value when one is still stored
    ///
    /// If the primary path fails and the store holds a non-negative entry
    /// for `key`, that entry's value is returned instead of the failure.
    /// With no usable stale entry the original failure propagates.
    pub async fn get_with_stale<V, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        match self.get_with_ttl(key, loader, ttl).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(key = %key, error = %err, "load failed, attempting stale entry");
                match self.fetch_entry::<V>(key).await {
                    Some(entry) if !entry.is_negative() => {
                        info!(key = %key, "serving stale value");
                        self.metrics.record_stale_serve(key);
                        Ok(entry.value)
                    }
                    _ => Err(err),
                }
            }
        }
    }

    /// Delete the entry for `key` unconditionally; the next read misses
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        self.store.delete(key).await?;
        self.metrics
            .record_latency(CacheOperation::Delete, start.elapsed());
        debug!(key = %key, "invalidated cache key");
        Ok(())
    }

    /// Prime the cache out of band: run `loader` now and store its value
    ///
    /// No coalescing and no negative caching: a loader returning `None`
    /// writes nothing. The entry keeps the caller's exact TTL, unjittered.
    pub async fn warm<V, F, Fut>(&self, key: &str, loader: F, ttl: Duration) -> Result<()>
    where
        V: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        if let Some(value) = loader().await? {
            let bytes = self.serialize_entry(&CachedEntry::new(value))?;
            self.store_bytes(key, bytes, ttl).await;
            debug!(key = %key, "warmed cache key");
        }
        Ok(())
    }

    /// Read and decode the stored entry; store failures and undecodable
    /// bytes degrade to a miss so an outage recomputes instead of erroring
    async fn fetch_entry<V: DeserializeOwned>(&self, key: &str) -> Option<CachedEntry<V>> {
        let found = match self.store.get(key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key = %key, error = %err, "store read failed, treating as miss");
                self.metrics.record_store_error(key);
                return None;
            }
        };
        let bytes = found?;
        match self.deserialize_entry::<V>(&bytes) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key = %key, error = %err, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    /// Collapse concurrent misses for `key` into one loader run
    ///
    /// The executor returns the serialized entry bytes it stored (or `None`
    /// for a negative outcome), so waiters decode the exact same payload.
    async fn load_coalesced<V, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        let accessor = self.clone();
        let owned_key = key.to_string();

        let flight = self
            .flights
            .execute_with_timeout(
                key,
                move || async move { accessor.load_and_store(&owned_key, loader, ttl).await },
                self.config.flight_timeout,
            )
            .await?;

        match flight {
            None => Ok(None),
            Some(bytes) => {
                let entry: CachedEntry<V> = self.deserialize_entry(&bytes)?;
                Ok(entry.value)
            }
        }
    }

    /// Executor side of a coalesced miss: run the loader and persist
    async fn load_and_store<V, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<Vec<u8>>>
    where
        V: Serialize + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        let start = Instant::now();
        let loaded = loader().await;
        self.metrics
            .record_latency(CacheOperation::Load, start.elapsed());

        match loaded? {
            None => {
                debug!(key = %key, "loader found nothing, writing negative entry");
                let bytes = self.serialize_entry(&CachedEntry::<V>::negative())?;
                self.store_bytes(key, bytes, self.config.negative_ttl).await;
                Ok(None)
            }
            Some(value) => {
                let bytes = self.serialize_entry(&CachedEntry::new(value))?;
                let ttl = self.jittered_ttl(ttl);
                self.store_bytes(key, bytes.clone(), ttl).await;
                Ok(Some(bytes))
            }
        }
    }

    /// Fire-and-forget recompute of an aging entry
    ///
    /// Never awaited by the read path and never routed through the
    /// coalescer; any failure is logged and swallowed.
    fn spawn_refresh<V, F, Fut>(&self, key: &str, loader: F, ttl: Duration)
    where
        V: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        let accessor = self.clone();
        let key = key.to_string();

        tokio::spawn(async move {
            match loader().await {
                Ok(Some(value)) => match accessor.serialize_entry(&CachedEntry::new(value)) {
                    Ok(bytes) => {
                        let ttl = accessor.jittered_ttl(ttl);
                        accessor.store_bytes(&key, bytes, ttl).await;
                        debug!(key = %key, "background refresh completed");
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "background refresh failed");
                    }
                },
                Ok(None) => debug!(key = %key, "background refresh found nothing, keeping entry"),
                Err(err) => warn!(key = %key, error = %err, "background refresh failed"),
            }
        });
    }

    fn should_refresh_early(&self, age: Duration, ttl: Duration) -> bool {
        let probability = refresh_probability(self.config.beta, age, ttl);
        self.random.unit() < probability
    }

    /// Randomize `ttl` within ±`jitter_percentage` percent, never below 1s,
    /// so entries written together do not all expire together
    fn jittered_ttl(&self, ttl: Duration) -> Duration {
        let ttl_secs = ttl.as_secs();
        let jitter_range = (ttl_secs * u64::from(self.config.jitter_percentage) / 100) as i64;
        if jitter_range == 0 {
            return Duration::from_secs(ttl_secs.max(1));
        }
        let jitter = self.random.range(-jitter_range, jitter_range);
        let secs = (ttl_secs as i64 + jitter).max(1);
        Duration::from_secs(secs as u64)
    }

    /// Best-effort write: a failed store write is logged and the value
    /// still flows back to the caller unpersisted
    async fn store_bytes(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        let start = Instant::now();
        if let Err(err) = self.store.set(key, bytes, ttl).await {
            warn!(key = %key, error = %err, "store write failed, value not persisted");
            self.metrics.record_store_error(key);
        }
        self.metrics
            .record_latency(CacheOperation::Set, start.elapsed());
    }

    fn serialize_entry<V: Serialize>(&self, entry: &CachedEntry<V>) -> Result<Vec<u8>> {
        let start = Instant::now();
        let bytes = self.serializer.serialize(entry)?;
        self.metrics
            .record_latency(CacheOperation::Serialize, start.elapsed());
        Ok(bytes)
    }

    fn deserialize_entry<V: DeserializeOwned>(&self, bytes: &[u8]) -> Result<CachedEntry<V>> {
        let start = Instant::now();
        let entry = self.serializer.deserialize(bytes)?;
        self.metrics
            .record_latency(CacheOperation::Deserialize, start.elapsed());
        Ok(entry)
    }
}

impl<S, Z, M> Clone for CacheAccessor<S, Z, M>
where
    S: KeyValueStore,
    Z: Serializer,
    M: CacheMetrics,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            serializer: Arc::clone(&self.serializer),
            metrics: Arc::clone(&self.metrics),
            random: Arc::clone(&self.random),
            config: self.config.clone(),
            flights: self.flights.clone(),
        }
    }
}
