use crate::audit::{AuditKind, AuditOutcome, SYSTEM_STREAM};
use crate::errors::{AuthenticationError, GatewayError};
use crate::state::AppState;
use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use log::warn;
use serde_json::json;

/// Zone identifier the edge stamps on every forwarded request.
pub const EDGE_ZONE_HEADER: &str = "x-edge-zone-id";
/// Shared secret proving the request passed through the trusted edge.
pub const EDGE_VERIFY_HEADER: &str = "x-edge-verify";

/// Edge validation middleware.
///
/// Every protected route requires both edge headers, with the zone id and
/// shared secret matching the configured edge. A request missing either
/// header, or carrying a stale secret after rotation, did not come through
/// the WAF and is rejected before any tenant data is touched.
pub async fn require_edge(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    // Owned copies: nothing may borrow the request past the hand-off below
    let zone = req
        .headers()
        .get(EDGE_ZONE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let verify = req
        .headers()
        .get(EDGE_VERIFY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let verified = zone.as_deref() == Some(state.settings.edge.zone_id.as_str())
        && verify.as_deref() == Some(state.settings.edge.secret.as_str());

    if !verified {
        warn!(
            "Rejected request to {} that did not arrive through the trusted edge",
            req.uri().path()
        );
        state.audit.record(
            AuditKind::EdgeRejection,
            SYSTEM_STREAM,
            None,
            AuditOutcome::Denied,
            json!({
                "path": req.uri().path(),
                "zone_present": zone.is_some(),
                "verify_present": verify.is_some(),
            }),
        );
        return Err(AuthenticationError::EdgeUnverified.into());
    }

    Ok(next.run(req).await)
}
