use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid idempotency key: {0}")]
    InvalidKey(String),

    #[error("Unable to acquire lock for key '{key}' after {attempts} attempts")]
    LockExhausted { key: String, attempts: u32 },

    #[error("Operation failed: {0}")]
    OperationFailed(#[source] anyhow::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Key {0} already exists")]
    KeyConflict(String),

    #[error("Stored result for key '{key}' cannot be read as the requested type: {source}")]
    TypeMismatch {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// True for failures raised by a store backend rather than by the caller or the operation.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            AppError::Storage(_) | AppError::Redis(_) | AppError::KeyConflict(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
