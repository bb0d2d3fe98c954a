use crate::api::oauth::broker::CodeBroker;
use crate::audit::AuditLog;
use crate::config::Settings;
use crate::failover::FailoverCoordinator;
use crate::roles::RoleResolver;
use crate::sessions::SessionService;
use crate::store::replicated::{RegionStore, ReplicatedStore};
use crate::store::create_store;
use crate::tenant::TenantCatalog;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use watchtower::{HttpHealthChecker, RegionMonitor, RegionMonitorOptions};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<ReplicatedStore>,
    pub catalog: Arc<TenantCatalog>,
    pub roles: Arc<RoleResolver>,
    pub sessions: Arc<SessionService>,
    pub broker: Arc<CodeBroker>,
    pub coordinator: Arc<FailoverCoordinator>,
    pub audit: AuditLog,
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Self, io::Error> {
        let audit = AuditLog::start(settings.audit.retention_secs);

        let region_names: Vec<String> = if settings.failover.regions.is_empty() {
            vec![settings.failover.region.clone()]
        } else {
            settings.failover.regions.iter().map(|r| r.name.clone()).collect()
        };
        let coordinator = Arc::new(FailoverCoordinator::new(region_names.clone(), audit.clone()));

        let mut regions = Vec::with_capacity(region_names.len());
        for name in &region_names {
            let store = create_store(&settings.store)
                .await
                .map_err(|e| io::Error::other(format!("Failed to create store: {e}")))?;
            regions.push(RegionStore {
                name: name.clone(),
                store,
            });
        }
        let store = Arc::new(ReplicatedStore::new(
            regions,
            Arc::clone(&coordinator),
            settings.store.timeout_ms,
            settings.replication_timeout_ms,
        ));

        let catalog = Arc::new(
            TenantCatalog::from_settings(&settings)
                .map_err(|e| io::Error::other(format!("Invalid tenant configuration: {e}")))?,
        );
        let roles = Arc::new(RoleResolver::from_settings(&settings));
        let sessions = Arc::new(SessionService::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&roles),
            audit.clone(),
            settings.max_sessions_per_subject,
        ));
        let broker = Arc::new(CodeBroker::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&sessions),
            audit.clone(),
            settings.code_ttl_secs(),
        ));

        let state = Self {
            settings: Arc::new(settings),
            store,
            catalog,
            roles,
            sessions,
            broker,
            coordinator,
            audit,
        };
        state.spawn_region_monitors();
        Ok(state)
    }

    /// Start a health probe for every region that exposes a health endpoint.
    fn spawn_region_monitors(&self) {
        let failover = &self.settings.failover;
        for region in &failover.regions {
            let Some(url) = &region.health_url else {
                continue;
            };
            let checker = HttpHealthChecker::new(url.clone());
            let monitor = RegionMonitor::start_with_opt(
                region.name.clone(),
                checker,
                RegionMonitorOptions {
                    probe_interval: Duration::from_secs(failover.probe_interval_secs),
                    failure_threshold: failover.failure_threshold,
                    initial_delay: Duration::ZERO,
                },
            );
            self.coordinator.attach(monitor);
        }
    }

    #[cfg(test)]
    pub async fn for_testing(settings: &Settings) -> Self {
        Self::new(settings.clone())
            .await
            .expect("Failed to build test state")
    }
}
