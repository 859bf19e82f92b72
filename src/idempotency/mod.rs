pub mod cleanup;
pub mod coordinator;
pub mod key;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use cleanup::StoreCleanupJob;
pub use coordinator::{CoordinatorMetrics, IdempotencyCoordinator, MetricsSnapshot};
pub use key::{generate_key, generate_key_at, normalize_client_key, validate_key};
pub use memory::InMemoryKeyResultStore;
pub use redis_store::RedisKeyResultStore;
pub use store::KeyResultStore;
