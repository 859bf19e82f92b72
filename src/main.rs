use idempotent_exec::config::{Settings, StoreBackend};
use idempotent_exec::idempotency::{
    IdempotencyCoordinator, InMemoryKeyResultStore, KeyResultStore, RedisKeyResultStore,
    StoreCleanupJob,
};
use idempotent_exec::observability::{init_logging, init_metrics, mask_key, LogConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Receipt {
    reference: String,
    amount_cents: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging and metrics
    init_logging(&LogConfig::from(&settings.logging));
    init_metrics()?;
    info!("Configuration loaded");

    let store_config = settings.store_config();
    let store: Arc<dyn KeyResultStore> = match settings.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory idempotency store");
            Arc::new(InMemoryKeyResultStore::with_config(&store_config))
        }
        StoreBackend::Redis => {
            let url = settings.store.redis_url.as_deref().unwrap_or_default();
            info!("Using Redis idempotency store");
            let store = RedisKeyResultStore::open(url, &store_config)?;
            store.exists("idem_startup_check").await?;
            info!("Redis connection established");
            Arc::new(store)
        }
    };

    let cleanup = StoreCleanupJob::new(Arc::clone(&store), store_config.cleanup_interval).start();
    let coordinator = IdempotencyCoordinator::with_config(store, settings.coordinator_config());

    // Submit the same request twice; the second call must observe the first receipt.
    let key = coordinator.generate_key();
    for attempt in 1..=2 {
        let receipt: Receipt = coordinator
            .execute(&key, || async {
                info!("Charging card for request {}", mask_key(&key));
                Ok::<_, anyhow::Error>(Receipt {
                    reference: uuid::Uuid::new_v4().to_string(),
                    amount_cents: 4_999,
                })
            })
            .await?;
        info!(
            "Attempt {}: receipt {} for {} cents",
            attempt, receipt.reference, receipt.amount_cents
        );
    }

    let snapshot = coordinator.metrics().snapshot();
    info!(
        "Executed {} operation(s), served {} cached result(s)",
        snapshot.executed, snapshot.cached_hits
    );

    cleanup.abort();
    Ok(())
}
