use super::{StoreBackend, StoreError};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};

/// Stored payload plus the TTL it was written with.
#[derive(Clone)]
struct StoredValue {
    payload: String,
    ttl_secs: u64,
}

/// Expires each entry after its own TTL rather than a cache-wide one;
/// codes live for seconds, sessions for hours.
struct PerEntryExpiry;

impl Expiry<String, StoredValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Duration::from_secs(value.ttl_secs))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Duration::from_secs(value.ttl_secs))
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    cache: MokaCache<String, StoredValue>,
}

impl InMemoryStore {
    /// Initialize a new in-memory store instance
    pub fn new(capacity_mib: usize) -> Result<Self, String> {
        let max_capacity_bytes: u64 = (capacity_mib * 1024 * 1024)
            .try_into()
            .map_err(|_| "Capacity overflow".to_string())?;

        let cache = MokaCache::builder()
            .weigher(|_key, value: &StoredValue| -> u32 {
                value.payload.len().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_capacity_bytes)
            .expire_after(PerEntryExpiry)
            .build();

        Ok(Self { cache })
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value)?;
        self.cache
            .insert(key.to_string(), StoredValue { payload, ttl_secs })
            .await;
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        if let Some(value) = self.cache.get(key).await {
            serde_json::from_str(&value.payload)
                .map_err(|e| StoreError::Deserialization(e.to_string()))
                .map(Some)
        } else {
            Ok(None)
        }
    }

    async fn compare_and_swap<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        expected: Option<&T>,
        next: &T,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let expected_payload = expected.map(serde_json::to_string).transpose()?;
        let next_value = StoredValue {
            payload: serde_json::to_string(next)?,
            ttl_secs,
        };

        // Moka's entry-level compute runs the closure under a per-key lock,
        // which makes the swap linearizable per record.
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let matches = match current.map(|e| e.into_value()) {
                    None => expected_payload.is_none(),
                    Some(cur) => expected_payload.as_deref() == Some(cur.payload.as_str()),
                };
                let op = if matches { Op::Put(next_value) } else { Op::Nop };
                std::future::ready(op)
            })
            .await;

        Ok(matches!(
            result,
            CompResult::Inserted(_) | CompResult::ReplacedWith(_)
        ))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.cache.remove(key).await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        field: String,
    }

    #[tokio::test]
    async fn per_entry_ttl_expires_records() {
        let store = InMemoryStore::new(16).unwrap();

        let data = TestData {
            field: "short-lived".to_string(),
        };
        store.put("code_key", &data, 1).await.unwrap();
        store.put("sess_key", &data, 120).await.unwrap();

        let read: TestData = store.get("code_key").await.unwrap().unwrap();
        assert_eq!(read, data);

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;

        // The 1s entry is gone, the 120s entry survives
        assert!(store.get::<TestData>("code_key").await.unwrap().is_none());
        assert!(store.get::<TestData>("sess_key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn health_check_always_passes() {
        let store = InMemoryStore::new(16).unwrap();
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn swap_against_stale_expectation_loses() {
        let store = InMemoryStore::new(16).unwrap();
        let v0 = TestData {
            field: "v0".to_string(),
        };
        let v1 = TestData {
            field: "v1".to_string(),
        };
        let v2 = TestData {
            field: "v2".to_string(),
        };

        store.put("k", &v0, 60).await.unwrap();
        assert!(store.compare_and_swap("k", Some(&v0), &v1, 60).await.unwrap());
        // v0 is stale now
        assert!(!store.compare_and_swap("k", Some(&v0), &v2, 60).await.unwrap());
        let read: TestData = store.get("k").await.unwrap().unwrap();
        assert_eq!(read, v1);
    }
}
