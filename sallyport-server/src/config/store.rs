use serde::Deserialize;

/// Which shared store backend holds sessions and authorization codes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackendKind {
    InMemory,
    Redis,
}

impl Default for StoreBackendKind {
    fn default() -> Self {
        StoreBackendKind::InMemory
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryStoreConfig {
    /// Maximum capacity in MiB (default: 128)
    #[serde(default = "default_memory_capacity_mib")]
    pub capacity_mib: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            capacity_mib: default_memory_capacity_mib(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisStoreConfig {
    /// Redis connection string
    #[serde(default)]
    pub url: String,
}

/// Shared store configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Store backend: "in-memory" (default) or "redis"
    #[serde(default)]
    pub backend: StoreBackendKind,

    /// Per-operation timeout in milliseconds; must stay below the
    /// request timeout so a slow store surfaces as a retryable error
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// In-memory backend configuration
    #[serde(default)]
    pub memory: MemoryStoreConfig,

    /// Redis backend configuration
    #[serde(default)]
    pub redis: RedisStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::default(),
            timeout_ms: default_store_timeout_ms(),
            memory: MemoryStoreConfig::default(),
            redis: RedisStoreConfig::default(),
        }
    }
}

fn default_memory_capacity_mib() -> usize {
    128
}

fn default_store_timeout_ms() -> u64 {
    1000
}
