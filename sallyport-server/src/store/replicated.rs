use super::{Store, StoreBackend, StoreError};
use crate::failover::{FailoverCoordinator, RegionState};
use log::warn;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// One region's share of the session state.
pub struct RegionStore {
    pub name: String,
    pub store: Store,
}

/// Store frontend that routes every operation through the failover
/// coordinator.
///
/// Writes land on the active region first and are then fanned out to every
/// region that is not `Down`, each bounded by the replication timeout. A
/// replica that misses the window is lagging, not failing: the write has
/// already been acknowledged by the active region, so fan-out failures are
/// logged and swallowed. Reads go to the active region and fall back to any
/// region still serving reads when the active one errors mid-transition.
pub struct ReplicatedStore {
    regions: Vec<RegionStore>,
    coordinator: Arc<FailoverCoordinator>,
    op_timeout: Duration,
    replication_timeout: Duration,
}

impl ReplicatedStore {
    pub fn new(
        regions: Vec<RegionStore>,
        coordinator: Arc<FailoverCoordinator>,
        op_timeout_ms: u64,
        replication_timeout_ms: u64,
    ) -> Self {
        Self {
            regions,
            coordinator,
            op_timeout: Duration::from_millis(op_timeout_ms),
            replication_timeout: Duration::from_millis(replication_timeout_ms),
        }
    }

    /// Name of the region currently serving writes.
    pub fn active_region_name(&self) -> Option<String> {
        self.coordinator.active_region()
    }

    fn active(&self) -> Result<&RegionStore, StoreError> {
        let name = self
            .coordinator
            .active_region()
            .ok_or_else(|| StoreError::Unavailable("no active region".to_string()))?;
        self.regions
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| StoreError::Unavailable(format!("active region '{name}' has no store")))
    }

    fn replicas_of<'a>(&'a self, active_name: &'a str) -> impl Iterator<Item = &'a RegionStore> + 'a {
        self.regions.iter().filter(move |r| {
            r.name != active_name
                && self
                    .coordinator
                    .state_of(&r.name)
                    .is_some_and(|s| s != RegionState::Down)
        })
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout.as_millis() as u64))?
    }

    /// Synchronous best-effort fan-out of one record to all live replicas.
    async fn replicate<T: Serialize + Send + Sync>(
        &self,
        active_name: &str,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) {
        for replica in self.replicas_of(active_name) {
            let outcome = timeout(
                self.replication_timeout,
                replica.store.put(key, value, ttl_secs),
            )
            .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Replication of '{key}' to region '{}' failed: {e}",
                    replica.name
                ),
                Err(_) => warn!(
                    "Replication of '{key}' to region '{}' timed out after {:?}",
                    replica.name, self.replication_timeout
                ),
            }
        }
    }

    async fn replicate_delete(&self, active_name: &str, key: &str) {
        for replica in self.replicas_of(active_name) {
            let outcome = timeout(self.replication_timeout, replica.store.delete(key)).await;
            if !matches!(outcome, Ok(Ok(()))) {
                warn!(
                    "Replicated delete of '{key}' to region '{}' did not complete",
                    replica.name
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl StoreBackend for ReplicatedStore {
    async fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let active = self.active()?;
        self.bounded(active.store.put(key, value, ttl_secs)).await?;
        self.replicate(&active.name, key, value, ttl_secs).await;
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let active = self.active()?;
        match self.bounded(active.store.get(key)).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!("Read of '{key}' from active region '{}' failed: {e}", active.name);
                for fallback in self.regions.iter().filter(|r| {
                    r.name != active.name && self.coordinator.serves_reads(&r.name)
                }) {
                    if let Ok(found) = self.bounded(fallback.store.get(key)).await {
                        return Ok(found);
                    }
                }
                Err(e)
            }
        }
    }

    async fn compare_and_swap<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        expected: Option<&T>,
        next: &T,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let active = self.active()?;
        let won = self
            .bounded(active.store.compare_and_swap(key, expected, next, ttl_secs))
            .await?;
        // Only the winning transition is propagated; replicas converge on the
        // value the active region settled on.
        if won {
            self.replicate(&active.name, key, next, ttl_secs).await;
        }
        Ok(won)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let active = self.active()?;
        self.bounded(active.store.delete(key)).await?;
        self.replicate_delete(&active.name, key).await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        let active = self.active().map_err(|e| e.to_string())?;
        active.store.health_check().await
    }
}
