use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Backing store for idempotency results and per-key locks.
///
/// Results and locks for the same key are independent; the store enforces no
/// relationship between "has a result" and "is locked". Every operation must be
/// consistent for a single key under concurrent callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyResultStore: Send + Sync {
    /// Whether an unexpired result is stored for `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Persists `result` under `key`. With no expiration the entry lives until removed.
    async fn store(
        &self,
        key: &str,
        result: serde_json::Value,
        expiration: Option<Duration>,
    ) -> Result<()>;

    /// Returns the stored value, if any.
    async fn get_result(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Tries to take the exclusive lock for `key`, waiting at most `max_wait`.
    async fn try_lock(&self, key: &str, max_wait: Duration) -> Result<bool>;

    /// Releases the lock for `key`. Releasing a lock that is not held is a no-op.
    async fn release_lock(&self, key: &str) -> Result<()>;

    /// Deletes any stored result for `key`, regardless of lock state.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Drops expired entries and any bookkeeping that is no longer needed.
    /// Returns the number of entries removed.
    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }
}
