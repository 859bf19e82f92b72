use crate::error::{AppError, Result};
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    #[validate]
    pub coordinator: CoordinatorSettings,
    #[validate]
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CoordinatorSettings {
    #[validate(range(min = 1, max = 86_400_000))]
    pub lock_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub result_expiration_secs: u64,
    #[validate(range(min = 1, max = 100))]
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub strict_mode: bool,
    pub redis_url: Option<String>,
    #[validate(length(min = 1))]
    pub key_prefix: String,
    #[validate(range(min = 1))]
    pub lock_poll_interval_ms: u64,
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Settings {
    /// Loads settings from defaults, `config/default`, `config/local` and `IDEMPOTENCY__*` env vars.
    pub fn new() -> Result<Self> {
        let builder = Self::with_defaults(config::Config::builder())?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("IDEMPOTENCY").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    /// Settings built from defaults alone.
    pub fn defaults() -> Result<Self> {
        let settings: Settings = Self::with_defaults(config::Config::builder())?
            .build()?
            .try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(builder
            .set_default("coordinator.lock_timeout_ms", 300_000)?
            .set_default("coordinator.result_expiration_secs", 86_400)?
            .set_default("coordinator.max_retries", 3)?
            .set_default("coordinator.retry_backoff_ms", 100)?
            .set_default("store.backend", "memory")?
            .set_default("store.strict_mode", false)?
            .set_default("store.key_prefix", "idem")?
            .set_default("store.lock_poll_interval_ms", 25)?
            .set_default("store.cleanup_interval_secs", 60)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?)
    }

    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(AppError::Validation(
                "store.redis_url is required for the redis backend".to_string(),
            ));
        }

        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::from(&self.coordinator)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::from(&self.store)
    }
}

/// Tunables of the execution coordinator. Immutable once the coordinator is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Maximum wait for a single lock attempt.
    pub lock_timeout: Duration,
    /// Expiration applied to newly stored results.
    pub result_expiration: Duration,
    /// Number of lock attempts before giving up.
    pub max_retries: u32,
    /// Base of the linear backoff; attempt `n` sleeps `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5 * 60),
            result_expiration: Duration::from_secs(24 * 60 * 60),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl From<&CoordinatorSettings> for CoordinatorConfig {
    fn from(settings: &CoordinatorSettings) -> Self {
        Self {
            lock_timeout: Duration::from_millis(settings.lock_timeout_ms),
            result_expiration: Duration::from_secs(settings.result_expiration_secs),
            max_retries: settings.max_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Reject stores over an existing unexpired entry instead of overwriting it.
    pub strict_mode: bool,
    pub key_prefix: String,
    pub lock_poll_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            key_prefix: "idem".to_string(),
            lock_poll_interval: Duration::from_millis(25),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl From<&StoreSettings> for StoreConfig {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            strict_mode: settings.strict_mode,
            key_prefix: settings.key_prefix.clone(),
            lock_poll_interval: Duration::from_millis(settings.lock_poll_interval_ms),
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs),
        }
    }
}
