use crate::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::idempotency::store::KeyResultStore;
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::time::Instant;

/// Redis-backed store. Results live under `<prefix>:result:<key>` with a native TTL;
/// locks are `SET NX PX` markers under `<prefix>:lock:<key>` that expire after the
/// requested wait, so a crashed holder cannot block a key forever.
pub struct RedisKeyResultStore {
    client: redis::Client,
    key_prefix: String,
    strict_mode: bool,
    poll_interval: Duration,
}

impl RedisKeyResultStore {
    pub fn new(client: redis::Client, config: &StoreConfig) -> Self {
        Self {
            client,
            key_prefix: config.key_prefix.clone(),
            strict_mode: config.strict_mode,
            poll_interval: config.lock_poll_interval,
        }
    }

    pub fn open(url: &str, config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self::new(client, config))
    }

    fn result_key(&self, key: &str) -> String {
        format!("{}:result:{}", self.key_prefix, key)
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }

    /// Single `SET NX PX` attempt on the lock marker.
    async fn try_set_lock(
        &self,
        conn: &mut MultiplexedConnection,
        lock_key: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let acquired: Option<String> = conn
            .set_options(
                lock_key,
                "locked",
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::PX(ttl_millis(ttl))),
            )
            .await?;

        Ok(acquired.is_some())
    }
}

/// Deadline for a lock wait. `None` when `max_wait` is too large to represent,
/// in which case the wait is unbounded.
fn lock_deadline(start: Instant, max_wait: Duration) -> Option<Instant> {
    start.checked_add(max_wait)
}

fn ttl_millis(ttl: Duration) -> usize {
    usize::try_from(ttl.as_millis()).unwrap_or(usize::MAX).max(1)
}

#[async_trait]
impl KeyResultStore for RedisKeyResultStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let result: Result<bool> = conn
            .exists(self.result_key(key))
            .await
            .map_err(AppError::Redis);
        get_metrics().record_store_operation("redis", "exists", timer.elapsed_ms(), result.is_ok());
        result
    }

    async fn store(
        &self,
        key: &str,
        result: serde_json::Value,
        expiration: Option<Duration>,
    ) -> Result<()> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&result)?;
        let result_key = self.result_key(key);

        let mut options = redis::SetOptions::default();
        if self.strict_mode {
            options = options.conditional_set(redis::ExistenceCheck::NX);
        }
        if let Some(ttl) = expiration {
            options = options.with_expiration(redis::SetExpiry::PX(ttl_millis(ttl)));
        }

        let written: Option<String> = conn.set_options(&result_key, payload, options).await?;
        get_metrics().record_store_operation("redis", "store", timer.elapsed_ms(), written.is_some());

        if written.is_none() {
            return Err(AppError::KeyConflict(key.to_string()));
        }

        Ok(())
    }

    async fn get_result(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let timer = LatencyTimer::new();
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.result_key(key)).await?;
        get_metrics().record_store_operation("redis", "get", timer.elapsed_ms(), true);

        value
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|e| {
                    AppError::Storage(format!("Corrupt stored result for key {}: {}", key, e))
                })
            })
            .transpose()
    }

    async fn try_lock(&self, key: &str, max_wait: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let lock_key = self.lock_key(key);
        let deadline = lock_deadline(Instant::now(), max_wait);

        loop {
            if self.try_set_lock(&mut conn, &lock_key, max_wait).await? {
                return Ok(true);
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };

            tokio::time::sleep(pause).await;
        }
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(self.lock_key(key)).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(self.result_key(key)).await?;
        Ok(())
    }
}
