use super::{StoreBackend, StoreError};
use async_trait::async_trait;
use log::error;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use serde::{de::DeserializeOwned, Serialize};

/// Single-winner swap: replaces the key only when its current value equals
/// ARGV[1] (empty string = key must be absent). Runs atomically server-side.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if (current == false and ARGV[1] == '') or current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
  return 1
end
return 0
"#;

#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    conn_manager: ConnectionManager,
}

impl RedisStore {
    /// Initialize a new Redis store instance
    pub async fn new(redis_url: &str) -> Result<Self, String> {
        let client = match Client::open(redis_url) {
            Ok(client) => client,
            Err(err) => {
                return Err(format!("Failed to connect to Redis: {}", err));
            }
        };

        let conn_manager = match ConnectionManager::new(client.clone()).await {
            Ok(manager) => manager,
            Err(err) => {
                return Err(format!(
                    "Failed to create Redis connection manager: {}",
                    err
                ));
            }
        };

        // Test the connection to ensure it's working
        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {}", err));
        }

        Ok(Self {
            conn_manager,
            _client: client,
        })
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.conn_manager.clone();

        match conn.set_ex::<_, _, ()>(key, serialized, ttl_secs).await {
            Ok(_) => Ok(()),
            Err(err) => {
                error!("Redis error while setting key {}: {}", key, err);
                Err(StoreError::Redis(err.to_string()))
            }
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn_manager.clone();

        let result: Option<String> = match conn.get(key).await {
            Ok(value) => value,
            Err(err) => {
                if err.kind() == redis::ErrorKind::TypeError {
                    // Key doesn't exist
                    return Ok(None);
                }
                error!("Redis error while getting key {}: {}", key, err);
                return Err(StoreError::Redis(err.to_string()));
            }
        };

        if let Some(value) = result {
            serde_json::from_str(&value)
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
        let expected_serialized = match expected {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let next_serialized = serde_json::to_string(next)?;
        let mut conn = self.conn_manager.clone();

        let won: i64 = Script::new(CAS_SCRIPT)
            .key(key)
            .arg(expected_serialized)
            .arg(next_serialized)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|err| {
                error!("Redis error while swapping key {}: {}", key, err);
                StoreError::Redis(err.to_string())
            })?;

        Ok(won == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        match conn.del::<_, ()>(key).await {
            Ok(_) => Ok(()),
            Err(err) => {
                error!("Redis error while deleting key {}: {}", key, err);
                Err(StoreError::Redis(err.to_string()))
            }
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }
}
