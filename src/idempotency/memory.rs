use crate::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::idempotency::store::KeyResultStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, Semaphore};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// In-process store: a result table with per-entry expiration and a lock table of
/// binary semaphores created lazily on the first lock attempt for a key.
///
/// Both tables belong to this instance, so independent stores never share locks.
/// Lock entries are only dropped by [`KeyResultStore::purge_expired`].
#[derive(Debug, Default)]
pub struct InMemoryKeyResultStore {
    results: RwLock<HashMap<String, StoredEntry>>,
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
    strict_mode: bool,
}

impl InMemoryKeyResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            strict_mode: config.strict_mode,
            ..Self::default()
        }
    }

    pub fn strict() -> Self {
        Self {
            strict_mode: true,
            ..Self::default()
        }
    }

    /// Number of result entries, expired ones included until purged.
    pub async fn result_count(&self) -> usize {
        self.results.read().await.len()
    }

    /// Number of lock entries ever created and not yet pruned.
    pub async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn semaphore(&self, key: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}

#[async_trait]
impl KeyResultStore for InMemoryKeyResultStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let results = self.results.read().await;
        Ok(results
            .get(key)
            .map_or(false, |entry| !entry.is_expired(Instant::now())))
    }

    async fn store(
        &self,
        key: &str,
        result: serde_json::Value,
        expiration: Option<Duration>,
    ) -> Result<()> {
        let now = Instant::now();
        let mut results = self.results.write().await;

        if self.strict_mode {
            if let Some(existing) = results.get(key) {
                if !existing.is_expired(now) {
                    return Err(AppError::KeyConflict(key.to_string()));
                }
            }
        }

        let expires_at = match expiration {
            Some(ttl) => Some(now.checked_add(ttl).ok_or_else(|| {
                AppError::Storage(format!("Expiration {:?} is out of range", ttl))
            })?),
            None => None,
        };

        results.insert(
            key.to_string(),
            StoredEntry {
                value: result,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_result(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let results = self.results.read().await;
        let now = Instant::now();
        Ok(results
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn try_lock(&self, key: &str, max_wait: Duration) -> Result<bool> {
        let semaphore = self.semaphore(key).await;

        let acquired = tokio::time::timeout(max_wait, semaphore.acquire()).await;
        match acquired {
            Ok(Ok(permit)) => {
                // Ownership is not tracked; release_lock hands the permit back.
                permit.forget();
                Ok(true)
            }
            Ok(Err(_)) => Err(AppError::Storage(format!(
                "Lock for key {} was closed",
                key
            ))),
            Err(_) => Ok(false),
        }
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        let locks = self.locks.lock().await;
        if let Some(semaphore) = locks.get(key) {
            if semaphore.available_permits() == 0 {
                semaphore.add_permits(1);
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.results.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let mut results = self.results.write().await;
        let before = results.len();
        results.retain(|_, entry| !entry.is_expired(now));
        let purged_results = before - results.len();

        // A lock entry is dropped only when nobody holds or waits on it and no live
        // result still refers to its key.
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|key, semaphore| {
            let idle = Arc::strong_count(semaphore) == 1 && semaphore.available_permits() == 1;
            !idle || results.contains_key(key)
        });
        let purged_locks = before - locks.len();

        Ok((purged_results + purged_locks) as u64)
    }
}
