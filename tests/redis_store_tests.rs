//! Requires a running Redis: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`

use idempotent_exec::config::StoreConfig;
use idempotent_exec::error::AppError;
use idempotent_exec::idempotency::{
    generate_key, IdempotencyCoordinator, KeyResultStore, RedisKeyResultStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn redis_store(strict_mode: bool) -> RedisKeyResultStore {
    dotenvy::dotenv().ok();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let config = StoreConfig {
        strict_mode,
        key_prefix: format!("idem-test-{}", uuid::Uuid::new_v4().simple()),
        ..StoreConfig::default()
    };

    RedisKeyResultStore::open(&url, &config).expect("Failed to open Redis client")
}

#[tokio::test]
#[ignore = "requires a running Redis instance"]
async fn test_redis_store_roundtrip_and_expiry() {
    let store = redis_store(false);
    let key = generate_key();

    assert!(!store.exists(&key).await.unwrap());
    store
        .store(&key, json!({"status": "settled"}), Some(Duration::from_millis(200)))
        .await
        .unwrap();
    assert!(store.exists(&key).await.unwrap());
    assert_eq!(
        store.get_result(&key).await.unwrap(),
        Some(json!({"status": "settled"}))
    );

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!store.exists(&key).await.unwrap());

    store.store(&key, json!(1), None).await.unwrap();
    store.remove(&key).await.unwrap();
    assert!(store.get_result(&key).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a running Redis instance"]
async fn test_redis_strict_mode_rejects_overwrite() {
    let store = redis_store(true);
    let key = generate_key();

    store.store(&key, json!(1), None).await.unwrap();
    let err = store.store(&key, json!(2), None).await.unwrap_err();

    assert!(matches!(err, AppError::KeyConflict(_)));
    store.remove(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis instance"]
async fn test_redis_lock_exclusive_and_released() {
    let store = redis_store(false);
    let key = generate_key();

    assert!(store.try_lock(&key, Duration::from_secs(5)).await.unwrap());
    assert!(!store.try_lock(&key, Duration::from_millis(50)).await.unwrap());

    store.release_lock(&key).await.unwrap();
    store.release_lock(&key).await.unwrap();

    assert!(store.try_lock(&key, Duration::from_secs(5)).await.unwrap());
    store.release_lock(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis instance"]
async fn test_coordinator_over_redis_executes_once() {
    let store = Arc::new(redis_store(false));
    let coordinator = IdempotencyCoordinator::new(store.clone());
    let key = generate_key();

    let first: String = coordinator
        .execute(&key, || async { Ok::<_, anyhow::Error>("OK".to_string()) })
        .await
        .unwrap();
    let second: String = coordinator
        .execute(&key, || async { Ok::<_, anyhow::Error>("AGAIN".to_string()) })
        .await
        .unwrap();

    assert_eq!(first, "OK");
    assert_eq!(second, "OK");
    store.remove(&key).await.unwrap();
}
