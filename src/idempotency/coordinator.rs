use crate::config::CoordinatorConfig;
use crate::error::{AppError, Result};
use crate::idempotency::key;
use crate::idempotency::store::KeyResultStore;
use crate::observability::{get_metrics, mask_key, LatencyTimer};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Counters for coordinator activity.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub total_requests: AtomicU64,
    pub executed: AtomicU64,
    pub cached_hits: AtomicU64,
    pub lock_contentions: AtomicU64,
    pub lock_exhausted: AtomicU64,
    pub failed: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_execution("executed");
    }

    pub fn record_cached_hit(&self) {
        self.cached_hits.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_execution("cached");
    }

    pub fn record_contention(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_exhausted(&self) {
        self.lock_exhausted.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_execution("lock_exhausted");
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_execution("failed");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            cached_hits: self.cached_hits.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
            lock_exhausted: self.lock_exhausted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub executed: u64,
    pub cached_hits: u64,
    pub lock_contentions: u64,
    pub lock_exhausted: u64,
    pub failed: u64,
}

impl MetricsSnapshot {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cached_hits as f64 / self.total_requests as f64
        }
    }
}

/// A held per-key lock.
///
/// Call [`LockGuard::release`] on every normal exit. If the guard is dropped without
/// that (the owning future was cancelled), the release is spawned onto the current
/// tokio runtime instead.
struct LockGuard {
    store: Arc<dyn KeyResultStore>,
    key: String,
    released: bool,
}

impl LockGuard {
    fn new(store: Arc<dyn KeyResultStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            released: false,
        }
    }

    /// Releases the lock. A failure is logged and never replaces the caller's outcome.
    async fn release(mut self) {
        // Set first: a release cancelled mid-flight must not be repeated from `drop`,
        // where it could free a lock the next caller already holds.
        self.released = true;
        let outcome = self.store.release_lock(&self.key).await;

        if let Err(e) = outcome {
            get_metrics().record_lock_release_failure();
            warn!("Failed to release lock for key {}: {}", mask_key(&self.key), e);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release_lock(&key).await {
                        get_metrics().record_lock_release_failure();
                        warn!("Failed to release abandoned lock for key {}: {}", mask_key(&key), e);
                    }
                });
            }
            Err(_) => {
                get_metrics().record_lock_release_failure();
                warn!(
                    "Lock for key {} abandoned outside a tokio runtime; it stays held",
                    mask_key(&key)
                );
            }
        }
    }
}

enum Acquisition<T> {
    Locked(LockGuard),
    Completed(T),
}

/// Runs operations at most once per idempotency key within the result retention window.
///
/// All coordination state lives in the store; the coordinator itself only holds
/// immutable configuration and counters, so it can be shared freely.
pub struct IdempotencyCoordinator {
    store: Arc<dyn KeyResultStore>,
    config: CoordinatorConfig,
    metrics: Arc<CoordinatorMetrics>,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn KeyResultStore>) -> Self {
        Self::with_config(store, CoordinatorConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyResultStore>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(CoordinatorMetrics::new()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn KeyResultStore> {
        Arc::clone(&self.store)
    }

    /// Gets the metrics for this coordinator.
    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Executes `operation` unless a result for `key` is already stored, in which case
    /// that result is returned and `operation` is never invoked.
    ///
    /// The per-key lock is the serialization point: whoever holds it re-checks the
    /// store, runs the operation and stores its result. Callers that lose the race
    /// back off linearly (`retry_backoff * attempt`) and return the winner's result
    /// as soon as it appears. Failed operations are not cached.
    pub async fn execute<T, F, Fut, E>(&self, key: &str, operation: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        self.metrics.record_request();

        if key.is_empty() {
            get_metrics().record_execution("invalid_key");
            return Err(AppError::InvalidKey(
                "Idempotency key cannot be empty".to_string(),
            ));
        }

        if !key::validate_key(key) {
            get_metrics().record_execution("invalid_key");
            return Err(AppError::InvalidKey(format!(
                "Invalid idempotency key format: {}",
                mask_key(key)
            )));
        }

        let guard = match self.acquire::<T>(key).await? {
            Acquisition::Locked(guard) => guard,
            Acquisition::Completed(result) => return Ok(result),
        };

        let outcome = self.run_locked(key, operation).await;
        guard.release().await;
        outcome
    }

    /// Whether a result is currently stored for `key`. An empty key is never processed.
    pub async fn is_processed(&self, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }

        self.store.exists(key).await
    }

    /// Drops the stored result for `key` so the next call executes again.
    pub async fn forget(&self, key: &str) -> Result<()> {
        if !key::validate_key(key) {
            return Err(AppError::InvalidKey(format!(
                "Invalid idempotency key format: {}",
                mask_key(key)
            )));
        }

        self.store.remove(key).await
    }

    pub fn generate_key(&self) -> String {
        key::generate_key()
    }

    pub fn validate_key(&self, key: &str) -> bool {
        key::validate_key(key)
    }

    async fn acquire<T: DeserializeOwned>(&self, key: &str) -> Result<Acquisition<T>> {
        let timer = LatencyTimer::new();
        let max_retries = self.config.max_retries;

        for attempt in 1..=max_retries {
            let acquired = self.store.try_lock(key, self.config.lock_timeout).await?;
            get_metrics().record_lock_attempt(acquired);

            if acquired {
                get_metrics().record_lock_wait_latency(timer.elapsed_ms());
                return Ok(Acquisition::Locked(LockGuard::new(self.store(), key)));
            }

            self.metrics.record_contention();
            debug!(
                "Lock for key {} is held elsewhere (attempt {}/{})",
                mask_key(key),
                attempt,
                max_retries
            );

            // Another caller may have finished while we waited.
            if let Some(result) = self.stored_result(key).await? {
                self.metrics.record_cached_hit();
                debug!("Returning result stored by another caller for key {}", mask_key(key));
                return Ok(Acquisition::Completed(result));
            }

            tokio::time::sleep(self.config.retry_backoff * attempt).await;
        }

        self.metrics.record_lock_exhausted();
        warn!(
            "Unable to acquire lock for key {} after {} retries",
            mask_key(key),
            max_retries
        );

        Err(AppError::LockExhausted {
            key: key.to_string(),
            attempts: max_retries,
        })
    }

    async fn run_locked<T, F, Fut, E>(&self, key: &str, operation: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        // Double-check: a result may have been stored between our first look and the lock.
        if let Some(result) = self.stored_result(key).await? {
            self.metrics.record_cached_hit();
            return Ok(result);
        }

        let timer = LatencyTimer::new();
        let result = match operation().await {
            Ok(result) => {
                get_metrics().record_operation_latency(timer.elapsed_ms(), true);
                result
            }
            Err(e) => {
                get_metrics().record_operation_latency(timer.elapsed_ms(), false);
                self.metrics.record_failed();
                let error = e.into();
                warn!("Operation for key {} failed: {}", mask_key(key), error);
                return Err(AppError::OperationFailed(error));
            }
        };

        let value = serde_json::to_value(&result)?;
        self.store
            .store(key, value, Some(self.config.result_expiration))
            .await?;
        self.metrics.record_executed();

        Ok(result)
    }

    async fn stored_result<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if !self.store.exists(key).await? {
            return Ok(None);
        }

        match self.store.get_result(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| AppError::TypeMismatch {
                    key: key.to_string(),
                    source,
                }),
            // Expired between the two reads.
            None => Ok(None),
        }
    }
}
