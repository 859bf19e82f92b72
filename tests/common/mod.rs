use async_trait::async_trait;
use idempotent_exec::error::Result;
use idempotent_exec::idempotency::{InMemoryKeyResultStore, KeyResultStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory store that counts the calls the coordinator makes.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryKeyResultStore,
    pub stores: AtomicUsize,
    pub lock_attempts: AtomicUsize,
    pub locks_acquired: AtomicUsize,
    pub releases: AtomicUsize,
    pub release_delay: Option<Duration>,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `release_lock` call waits `delay` before reaching the inner store.
    pub fn with_release_delay(delay: Duration) -> Self {
        Self {
            release_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn locks_acquired(&self) -> usize {
        self.locks_acquired.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyResultStore for CountingStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn store(
        &self,
        key: &str,
        result: serde_json::Value,
        expiration: Option<Duration>,
    ) -> Result<()> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.store(key, result, expiration).await
    }

    async fn get_result(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.inner.get_result(key).await
    }

    async fn try_lock(&self, key: &str, max_wait: Duration) -> Result<bool> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        let acquired = self.inner.try_lock(key, max_wait).await?;
        if acquired {
            self.locks_acquired.fetch_add(1, Ordering::SeqCst);
        }
        Ok(acquired)
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.release_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.release_lock(key).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.inner.purge_expired().await
    }
}
