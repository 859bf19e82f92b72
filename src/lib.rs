pub mod config;
pub mod error;
pub mod idempotency;
pub mod observability;

pub use error::{AppError, Result};
pub use idempotency::{IdempotencyCoordinator, InMemoryKeyResultStore, KeyResultStore};
