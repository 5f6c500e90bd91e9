//! Single-flight request coalescing
//!
//! Ensures only ONE concurrent execution runs for a given key, while all
//! other callers for that key wait for its result and share it.
//!
//! Implementation notes:
//! - The registry is a `DashMap`; the entry API gives an atomic
//!   insert-if-absent, so exactly one caller among simultaneous arrivals
//!   becomes the executor for a key without a global lock.
//! - Each call publishes its outcome over a per-key `watch` channel. `watch`
//!   is level-triggered: the outcome is sent BEFORE the registry record is
//!   removed, and a caller that joined the call just before removal still
//!   observes the published value.
//! - If a waiter sees the channel close with no outcome published (the
//!   executor's future was dropped mid-flight), the record is already gone
//!   and the waiter retries from the top, possibly becoming the executor.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use herd_cache_core::{CacheError, Result};

/// Wait bound applied by [`SingleFlight::execute`]
pub const DEFAULT_FLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

type Outcome<T> = Option<Result<T>>;
type Call<T> = Arc<watch::Sender<Outcome<T>>>;

enum Role<T> {
    Executor(Call<T>),
    Waiter(watch::Receiver<Outcome<T>>),
}

/// Removes the executor's registry record when it goes out of scope, so a
/// cancelled or panicked executor cannot strand its waiters: the channel
/// closes and they retry.
struct FlightGuard<'a, T> {
    calls: &'a DashMap<String, Call<T>>,
    key: &'a str,
    call: Call<T>,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.calls
            .remove_if(self.key, |_, registered| Arc::ptr_eq(registered, &self.call));
    }
}

/// Execution and deduplication counters for a [`SingleFlight`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightMetrics {
    /// Callers that waited on another caller's execution
    pub deduplications: u64,
    /// Callers that became the executor for their key
    pub executions: u64,
    /// `deduplications / (deduplications + executions) * 100`, 0 when idle
    pub dedup_ratio_percent: f64,
}

/// Per-key request coalescer
///
/// Tracks in-flight executions per key; at most one `InFlight` call exists
/// per key at any instant. The registry is purely in-process and ephemeral:
/// resolved calls are removed immediately, never kept as a cache.
///
/// Cloning creates a new handle to the SAME registry.
pub struct SingleFlight<T> {
    calls: Arc<DashMap<String, Call<T>>>,
    executions: Arc<AtomicU64>,
    deduplications: Arc<AtomicU64>,
    default_timeout: Duration,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            executions: Arc::clone(&self.executions),
            deduplications: Arc::clone(&self.deduplications),
            default_timeout: self.default_timeout,
        }
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleFlight<T> {
    /// Create a coalescer with the default waiter timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_FLIGHT_TIMEOUT)
    }

    /// Create a coalescer whose [`execute`](Self::execute) applies `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
            executions: Arc::new(AtomicU64::new(0)),
            deduplications: Arc::new(AtomicU64::new(0)),
            default_timeout: timeout,
        }
    }

    /// Snapshot of the execution/deduplication counters
    pub fn metrics(&self) -> FlightMetrics {
        let deduplications = self.deduplications.load(Ordering::Relaxed);
        let executions = self.executions.load(Ordering::Relaxed);
        let total = deduplications + executions;
        let dedup_ratio_percent = if total == 0 {
            0.0
        } else {
            deduplications as f64 / total as f64 * 100.0
        };
        FlightMetrics {
            deduplications,
            executions,
            dedup_ratio_percent,
        }
    }

    /// Zero the execution/deduplication counters
    pub fn reset_metrics(&self) {
        self.deduplications.store(0, Ordering::Relaxed);
        self.executions.store(0, Ordering::Relaxed);
    }
}

impl<T: Clone> SingleFlight<T> {
    /// [`execute_with_timeout`](Self::execute_with_timeout) with this
    /// coalescer's default timeout
    pub async fn execute<F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_timeout(key, operation, self.default_timeout)
            .await
    }

    /// Run `operation` under `key`, coalescing with any concurrent call
    ///
    /// The first caller for a key becomes the executor and runs `operation`
    /// to completion; every other caller arriving before the outcome is
    /// published waits for it and receives the same value, or the same
    /// failure wrapped in [`CacheError::Execution`]. A waiter whose bounded
    /// wait elapses fails with [`CacheError::Timeout`] without affecting the
    /// executor or the other waiters.
    pub async fn execute_with_timeout<F, Fut>(
        &self,
        key: &str,
        operation: F,
        timeout: Duration,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut operation = Some(operation);

        loop {
            let role = match self.calls.entry(key.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(existing) => {
                    Role::Waiter(existing.get().subscribe())
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let (tx, _rx) = watch::channel(None);
                    let call: Call<T> = Arc::new(tx);
                    slot.insert(Arc::clone(&call));
                    Role::Executor(call)
                }
            };

            match role {
                Role::Executor(call) => {
                    let op = match operation.take() {
                        Some(op) => op,
                        None => {
                            return Err(CacheError::Internal(
                                "single-flight operation consumed twice".to_string(),
                            ));
                        }
                    };
                    self.executions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "executing request");

                    let guard = FlightGuard {
                        calls: self.calls.as_ref(),
                        key,
                        call,
                    };
                    let outcome = op().await;

                    // Publish before removing the record: a caller that
                    // joined this call moments ago must still observe the
                    // outcome.
                    let _ = guard.call.send(Some(outcome.clone()));
                    drop(guard);
                    return outcome;
                }
                Role::Waiter(mut rx) => {
                    self.deduplications.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "request deduplicated, awaiting in-flight call");

                    match tokio::time::timeout(timeout, rx.wait_for(|outcome| outcome.is_some()))
                        .await
                    {
                        Err(_elapsed) => return Err(CacheError::Timeout),
                        Ok(Ok(resolved)) => match resolved.as_ref() {
                            Some(Ok(value)) => return Ok(value.clone()),
                            Some(Err(err)) => return Err(err.clone().into_execution()),
                            None => continue,
                        },
                        // Executor vanished without publishing; its record is
                        // gone, so start over (and maybe become the executor).
                        Ok(Err(_closed)) => continue,
                    }
                }
            }
        }
    }
}
