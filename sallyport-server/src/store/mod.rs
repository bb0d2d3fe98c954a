use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod memory;
pub mod redis;
pub mod replicated;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse stored record: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),
    #[error("Store configuration error: {0}")]
    Config(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Contract every shared store backend must fulfill.
///
/// The store is the single source of session truth shared by all gateway
/// instances, so the interface carries compare-and-swap: every mutation of a
/// single record (an authorization code being consumed, a session being
/// revoked) must be linearizable per record.
///
/// Implementations must be thread-safe (Send + Sync) and cloneable so they
/// can be shared across handlers.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
    /// Store a record under a key with a TTL in seconds
    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), StoreError>;

    /// Retrieve a record
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError>;

    /// Atomically replace the record at `key` with `next`, but only if its
    /// current serialized form equals `expected` (`None` = key must be
    /// absent). Returns whether this caller won the swap. Concurrent callers
    /// racing on the same transition see exactly one `true`.
    async fn compare_and_swap<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        expected: Option<&T>,
        next: &T,
        ttl_secs: u64,
    ) -> Result<bool, StoreError>;

    /// Delete a record
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Deep health check against the backend. For Redis this pings the
    /// server; for the in-memory store it always succeeds.
    async fn health_check(&self) -> Result<(), String>;
}

/// Type-safe wrapper around the configured store backend.
///
/// The concrete implementation is chosen at startup from configuration; all
/// call sites go through this enum so swapping backends never touches them.
#[derive(Clone)]
pub enum Store {
    /// In-memory store backed by Moka (single-instance deployments and tests)
    InMemory(memory::InMemoryStore),
    /// Redis-backed store shared across gateway instances
    Redis(redis::RedisStore),
}

#[async_trait::async_trait]
impl StoreBackend for Store {
    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.put(key, value, ttl_secs).await,
            Self::Redis(store) => store.put(key, value, ttl_secs).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self {
            Self::InMemory(store) => store.get(key).await,
            Self::Redis(store) => store.get(key).await,
        }
    }

    async fn compare_and_swap<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        expected: Option<&T>,
        next: &T,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        match self {
            Self::InMemory(store) => store.compare_and_swap(key, expected, next, ttl_secs).await,
            Self::Redis(store) => store.compare_and_swap(key, expected, next, ttl_secs).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.delete(key).await,
            Self::Redis(store) => store.delete(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
        }
    }
}

/// Create the store backend selected by configuration.
pub async fn create_store(config: &crate::config::StoreConfig) -> Result<Store, StoreError> {
    match config.backend {
        crate::config::StoreBackendKind::InMemory => {
            let store = memory::InMemoryStore::new(config.memory.capacity_mib)
                .map_err(StoreError::Config)?;
            Ok(Store::InMemory(store))
        }
        crate::config::StoreBackendKind::Redis => {
            if config.redis.url.is_empty() {
                return Err(StoreError::Config(
                    "Redis URL is required for the redis store backend".to_string(),
                ));
            }
            let store = redis::RedisStore::new(&config.redis.url)
                .await
                .map_err(StoreError::Config)?;
            Ok(Store::Redis(store))
        }
    }
}
