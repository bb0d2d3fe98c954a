pub(crate) use crate::config::edge::EdgeConfig;
pub(crate) use crate::config::failover::{FailoverConfig, RegionConfig};
pub(crate) use crate::config::store::{StoreBackendKind, StoreConfig};
use crate::roles::{RolePolicy, RoleTier};
use config::{Config, ConfigError};
use serde::Deserialize;
use std::collections::HashMap;

pub mod edge;
pub mod failover;
pub mod store;

/// A client pre-registered with the gateway.
///
/// Authorization codes are only issued to registered clients, and only for the
/// exact redirect URI recorded here.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub redirect_uri: String,
    /// Tenant this client belongs to
    pub tenant_id: String,
    /// Service identity used when /authorize carries no subject
    pub default_subject: String,
    /// Minimum tier required to exchange a code issued to this client
    #[serde(default)]
    pub minimum_tier: Option<RoleTier>,
}

/// A tenant namespace known to the gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct TenantConfig {
    pub id: String,
    pub namespace: String,
    /// Name of the tenant's key in the external secret store
    #[serde(default)]
    pub key_ref: String,
}

/// A static (tenant, subject) → tier assignment.
#[derive(Debug, Deserialize, Clone)]
pub struct RoleAssignment {
    pub tenant_id: String,
    pub subject_id: String,
    pub tier: RoleTier,
}

/// Role resolver configuration: default tier, policy overrides, assignments.
#[derive(Debug, Deserialize, Clone)]
pub struct RolesConfig {
    /// Tier used when no assignment matches
    #[serde(default = "default_tier")]
    pub default_tier: RoleTier,
    /// Per-tier policy overrides; tiers not listed keep the built-in policy
    #[serde(default)]
    pub policies: HashMap<RoleTier, RolePolicy>,
    #[serde(default)]
    pub assignments: Vec<RoleAssignment>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            policies: HashMap::new(),
            assignments: Vec::new(),
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// How long audit events are retained, in seconds
    #[serde(default = "default_audit_retention_secs")]
    pub retention_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_audit_retention_secs(),
        }
    }
}

/// Main configuration for the gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// The port the gateway will listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Trusted edge configuration - mandatory, requests are rejected without it
    pub edge: EdgeConfig,

    /// Shared session/code store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Authorization code lifetime in seconds (clamped to 60..=120)
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,

    /// Maximum concurrent sessions per subject before LRU eviction
    #[serde(default = "default_max_sessions_per_subject")]
    pub max_sessions_per_subject: usize,

    /// Per-replica write timeout in milliseconds; bounds cross-region staleness
    #[serde(default = "default_replication_timeout_ms")]
    pub replication_timeout_ms: u64,

    /// Whole-request timeout in milliseconds; must stay above the store
    /// timeout so a slow store surfaces as 503, not a dropped request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for the /health component checks, in seconds
    #[serde(default = "default_healthcheck_timeout")]
    pub healthcheck_timeout: f64,

    /// Audit log configuration
    #[serde(default)]
    pub audit: AuditConfig,

    /// Regional failover configuration
    #[serde(default)]
    pub failover: FailoverConfig,

    /// Role resolver configuration
    #[serde(default)]
    pub roles: RolesConfig,

    /// Registered clients
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Known tenants
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

fn default_port() -> u16 {
    7786
}

fn default_code_ttl_secs() -> u64 {
    90
}

fn default_max_sessions_per_subject() -> usize {
    3
}

fn default_replication_timeout_ms() -> u64 {
    250
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_healthcheck_timeout() -> f64 {
    3.0
}

fn default_audit_retention_secs() -> u64 {
    // 30 days
    2_592_000
}

fn default_tier() -> RoleTier {
    RoleTier::Opal
}

impl Settings {
    /// Load settings from `sallyport.toml` (optional) layered under
    /// `SALLYPORT_*` environment variables.
    pub fn new() -> Result<Self, String> {
        Config::builder()
            .add_source(config::File::with_name("sallyport").required(false))
            .add_source(
                config::Environment::with_prefix("SALLYPORT")
                    .prefix_separator("_")
                    .separator("__")
                    .convert_case(config::Case::Snake),
            )
            .build()
            .map_err(|e: ConfigError| e.to_string())?
            .try_deserialize()
            .map_err(|e: ConfigError| e.to_string())
    }

    /// Authorization code TTL with the 60..=120 second bound applied.
    pub fn code_ttl_secs(&self) -> u64 {
        self.code_ttl_secs.clamp(60, 120)
    }

    /// Look up a registered client.
    pub fn client(&self, client_id: &str) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            port: 0,
            edge: EdgeConfig {
                zone_id: "zone-test".to_string(),
                secret: "edge-secret".to_string(),
            },
            store: StoreConfig::default(),
            code_ttl_secs: 90,
            max_sessions_per_subject: 3,
            replication_timeout_ms: 250,
            request_timeout_ms: 5000,
            healthcheck_timeout: 1.0,
            audit: AuditConfig {
                retention_secs: 3600,
            },
            failover: FailoverConfig {
                region: "us-west".to_string(),
                regions: vec![
                    RegionConfig {
                        name: "us-west".to_string(),
                        health_url: None,
                    },
                    RegionConfig {
                        name: "eu-central".to_string(),
                        health_url: None,
                    },
                ],
                probe_interval_secs: 5,
                failure_threshold: 3,
            },
            roles: RolesConfig {
                default_tier: RoleTier::Opal,
                policies: HashMap::new(),
                assignments: vec![
                    RoleAssignment {
                        tenant_id: "acme".to_string(),
                        subject_id: "svc-acme".to_string(),
                        tier: RoleTier::Emerald,
                    },
                    RoleAssignment {
                        tenant_id: "globex".to_string(),
                        subject_id: "svc-globex".to_string(),
                        tier: RoleTier::Diamond,
                    },
                ],
            },
            clients: vec![
                ClientConfig {
                    client_id: "acme-portal".to_string(),
                    redirect_uri: "https://a.example/cb".to_string(),
                    tenant_id: "acme".to_string(),
                    default_subject: "svc-acme".to_string(),
                    minimum_tier: None,
                },
                ClientConfig {
                    client_id: "globex-portal".to_string(),
                    redirect_uri: "https://b.example/cb".to_string(),
                    tenant_id: "globex".to_string(),
                    default_subject: "svc-globex".to_string(),
                    minimum_tier: None,
                },
                ClientConfig {
                    client_id: "acme-admin".to_string(),
                    redirect_uri: "https://admin.a.example/cb".to_string(),
                    tenant_id: "acme".to_string(),
                    default_subject: "svc-acme".to_string(),
                    minimum_tier: Some(RoleTier::Diamond),
                },
            ],
            tenants: vec![
                TenantConfig {
                    id: "acme".to_string(),
                    namespace: "acme".to_string(),
                    key_ref: "kms/acme".to_string(),
                },
                TenantConfig {
                    id: "globex".to_string(),
                    namespace: "globex".to_string(),
                    key_ref: "kms/globex".to_string(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for (name, _value) in std::env::vars() {
            if name.starts_with("SALLYPORT_") {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    fn defaults_load_with_only_edge_config() {
        clear_env();
        std::env::set_var("SALLYPORT_EDGE__ZONE_ID", "zone-prod");
        std::env::set_var("SALLYPORT_EDGE__SECRET", "edge-secret");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.port, 7786);
        assert_eq!(settings.edge.zone_id, "zone-prod");
        assert_eq!(settings.code_ttl_secs(), 90);
        assert_eq!(settings.max_sessions_per_subject, 3);
        assert_eq!(settings.replication_timeout_ms, 250);
        assert_eq!(settings.store.backend, StoreBackendKind::InMemory);
        assert_eq!(settings.store.timeout_ms, 1000);
        assert_eq!(settings.roles.default_tier, RoleTier::Opal);
        assert!(settings.clients.is_empty());

        std::env::remove_var("SALLYPORT_EDGE__ZONE_ID");
        std::env::remove_var("SALLYPORT_EDGE__SECRET");
    }

    #[test]
    fn missing_edge_config_is_an_error() {
        clear_env();
        assert!(Settings::new().is_err());
    }

    #[test]
    fn code_ttl_is_clamped_to_allowed_bounds() {
        let mut settings = Settings::for_test();
        settings.code_ttl_secs = 5;
        assert_eq!(settings.code_ttl_secs(), 60);
        settings.code_ttl_secs = 600;
        assert_eq!(settings.code_ttl_secs(), 120);
        settings.code_ttl_secs = 75;
        assert_eq!(settings.code_ttl_secs(), 75);
    }

    #[test]
    fn store_timeout_stays_below_the_request_timeout() {
        let settings = Settings::for_test();
        assert!(settings.store.timeout_ms < settings.request_timeout_ms);
        assert!(StoreConfig::default().timeout_ms < default_request_timeout_ms());
    }

    #[test]
    fn redis_backend_reads_url_from_env() {
        clear_env();
        std::env::set_var("SALLYPORT_EDGE__ZONE_ID", "zone-prod");
        std::env::set_var("SALLYPORT_EDGE__SECRET", "edge-secret");
        std::env::set_var("SALLYPORT_STORE__BACKEND", "redis");
        std::env::set_var("SALLYPORT_STORE__REDIS__URL", "redis://localhost:6379");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.store.backend, StoreBackendKind::Redis);
        assert_eq!(settings.store.redis.url, "redis://localhost:6379");

        clear_env();
    }
}
