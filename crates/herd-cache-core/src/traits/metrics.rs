//! Metrics trait for cache observability

use std::time::Duration;

/// Cache operation for latency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Get,
    Load,
    Set,
    Delete,
    Serialize,
    Deserialize,
}

impl CacheOperation {
    /// Get operation as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Load => "load",
            CacheOperation::Set => "set",
            CacheOperation::Delete => "delete",
            CacheOperation::Serialize => "serialize",
            CacheOperation::Deserialize => "deserialize",
        }
    }
}

/// Trait for cache metrics/observability
///
/// Implement this to integrate with your metrics system (Prometheus, StatsD, etc.)
pub trait CacheMetrics: Send + Sync + 'static {
    /// Record a cache hit
    fn record_hit(&self, key: &str);

    /// Record a cache miss
    fn record_miss(&self, key: &str);

    /// Record a negative cache hit (known-missing key served without a load)
    fn record_negative_hit(&self, key: &str);

    /// Record a stale value served in place of a failed load
    fn record_stale_serve(&self, key: &str);

    /// Record a background refresh being scheduled
    fn record_refresh(&self, key: &str);

    /// Record a swallowed store failure
    fn record_store_error(&self, key: &str);

    /// Record operation latency
    fn record_latency(&self, operation: CacheOperation, duration: Duration);
}

/// No-op metrics implementation (default)
///
/// Zero overhead when metrics are not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    #[inline]
    fn record_hit(&self, _key: &str) {}

    #[inline]
    fn record_miss(&self, _key: &str) {}

    #[inline]
    fn record_negative_hit(&self, _key: &str) {}

    #[inline]
    fn record_stale_serve(&self, _key: &str) {}

    #[inline]
    fn record_refresh(&self, _key: &str) {}

    #[inline]
    fn record_store_error(&self, _key: &str) {}

    #[inline]
    fn record_latency(&self, _operation: CacheOperation, _duration: Duration) {}
}

/// Metrics adapter using the `metrics` crate
///
/// Integrates with Prometheus, StatsD, and other exporters via the `metrics` ecosystem.
///
/// # Example
/// ```ignore
/// use herd_cache_core::MetricsCrateAdapter;
///
/// // Set up a metrics recorder (e.g., prometheus_exporter)
/// // metrics::set_global_recorder(recorder);
///
/// let metrics = MetricsCrateAdapter::new("herd_cache");
/// // Emits: herd_cache_hits_total, herd_cache_misses_total, etc.
/// ```
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsCrateAdapter {
    prefix: String,
}

#[cfg(feature = "metrics")]
impl MetricsCrateAdapter {
    /// Create a new adapter with the given metric name prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn metric_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }
}

#[cfg(feature = "metrics")]
impl CacheMetrics for MetricsCrateAdapter {
    fn record_hit(&self, _key: &str) {
        metrics::counter!(self.metric_name("hits_total")).increment(1);
    }

    fn record_miss(&self, _key: &str) {
        metrics::counter!(self.metric_name("misses_total")).increment(1);
    }

    fn record_negative_hit(&self, _key: &str) {
        metrics::counter!(self.metric_name("negative_hits_total")).increment(1);
    }

    fn record_stale_serve(&self, _key: &str) {
        metrics::counter!(self.metric_name("stale_serves_total")).increment(1);
    }

    fn record_refresh(&self, _key: &str) {
        metrics::counter!(self.metric_name("refreshes_total")).increment(1);
    }

    fn record_store_error(&self, _key: &str) {
        metrics::counter!(self.metric_name("store_errors_total")).increment(1);
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        metrics::histogram!(
            self.metric_name("operation_duration_seconds"),
            "operation" => operation.as_str()
        )
        .record(duration.as_secs_f64());
    }
}
