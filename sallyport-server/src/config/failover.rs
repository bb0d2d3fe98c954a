use serde::Deserialize;

/// One region participating in failover, in priority order.
#[derive(Debug, Deserialize, Clone)]
pub struct RegionConfig {
    pub name: String,
    /// Health endpoint probed by the failover coordinator; regions without
    /// one (e.g. the local region in tests) are assumed healthy
    #[serde(default)]
    pub health_url: Option<String>,
}

/// Regional failover configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct FailoverConfig {
    /// Name of the region this instance runs in
    #[serde(default = "default_region")]
    pub region: String,

    /// Ordered list of failover regions; the first entry is the preferred
    /// Active region, the rest start as Standby
    #[serde(default)]
    pub regions: Vec<RegionConfig>,

    /// Seconds between health probes
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Consecutive failed probes before a region is demoted
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            regions: Vec::new(),
            probe_interval_secs: default_probe_interval_secs(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_region() -> String {
    "us-west".to_string()
}

fn default_probe_interval_secs() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}
