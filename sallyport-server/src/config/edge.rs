use serde::Deserialize;

/// Trusted edge network configuration.
///
/// Both values are mandatory: without them every request would have to be
/// treated as having bypassed the edge.
#[derive(Debug, Deserialize, Clone)]
pub struct EdgeConfig {
    /// Zone identifier the edge stamps on forwarded requests
    pub zone_id: String,
    /// Shared secret the edge attaches in the x-edge-verify header,
    /// rotated externally through the secret store
    pub secret: String,
}
