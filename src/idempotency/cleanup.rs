use crate::error::Result;
use crate::idempotency::store::KeyResultStore;
use crate::observability::get_metrics;
use std::sync::Arc;
use std::time::Duration;

/// Shortest period the background loop ticks at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Background job that purges expired results and idle lock entries from a store.
pub struct StoreCleanupJob {
    store: Arc<dyn KeyResultStore>,
    interval: Duration,
}

impl StoreCleanupJob {
    pub fn new(store: Arc<dyn KeyResultStore>, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Runs the cleanup job once.
    pub async fn run_once(&self) -> Result<u64> {
        let purged = self.store.purge_expired().await?;
        get_metrics().record_cleanup(purged);
        Ok(purged)
    }

    /// Starts the cleanup job in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                interval.tick().await;

                match self.run_once().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Purged {} expired idempotency entries", count);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to purge expired idempotency entries: {}", e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::memory::InMemoryKeyResultStore;
    use crate::idempotency::store::MockKeyResultStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_once_reports_purged_count() {
        let mut mock = MockKeyResultStore::new();
        mock.expect_purge_expired().times(1).returning(|| Ok(4));

        let job = StoreCleanupJob::new(Arc::new(mock), Duration::from_secs(60));
        assert_eq!(job.run_once().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_background_job_purges_memory_store() {
        let store = Arc::new(InMemoryKeyResultStore::new());
        store
            .store("idem_cleanup_key_1", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.store("idem_cleanup_key_2", json!(2), None).await.unwrap();

        let handle = StoreCleanupJob::new(store.clone(), Duration::from_millis(20)).start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        assert_eq!(store.result_count().await, 1);
        assert!(store.exists("idem_cleanup_key_2").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_kill_job() {
        let store = Arc::new(InMemoryKeyResultStore::new());
        store
            .store("idem_cleanup_key_1", json!(1), Some(Duration::from_millis(5)))
            .await
            .unwrap();

        let handle = StoreCleanupJob::new(store.clone(), Duration::ZERO).start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!handle.is_finished());
        handle.abort();
        assert_eq!(store.result_count().await, 0);
    }
}
