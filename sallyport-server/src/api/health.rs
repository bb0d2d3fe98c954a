use crate::failover::RegionStatus;
use crate::openapi::HEALTH_TAG;
use crate::state::AppState;
use crate::store::StoreBackend;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::time::Duration;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Health {
    status: &'static str,
    version: &'static str,
    /// Region currently serving writes
    active_region: Option<String>,
    regions: Vec<RegionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<String>,
    #[serde(skip)]
    status_code: StatusCode,
}

impl IntoResponse for Health {
    fn into_response(self) -> Response {
        let status_code = self.status_code;
        (status_code, Json(self)).into_response()
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthy", get(health_check))
        .route("/ready", get(ready_check))
}

/// Liveness check: the process is up and a region is active.
#[utoipa::path(
    get,
    path = "/health",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Gateway is healthy", body = Health),
        (status = 503, description = "No region is able to serve requests", body = Health)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let active_region = state.coordinator.active_region();
    let status_code = if active_region.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Health {
        status: if status_code == StatusCode::OK { "ok" } else { "down" },
        version: env!("CARGO_PKG_VERSION"),
        active_region,
        regions: state.coordinator.snapshot(),
        store: None,
        status_code,
    }
}

/// Readiness check: liveness plus a deep check against the active store,
/// bounded by the configured health check timeout.
#[utoipa::path(
    get,
    path = "/ready",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Gateway is ready to serve", body = Health),
        (status = 503, description = "Gateway cannot reach its store", body = Health)
    )
)]
async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    let deadline = Duration::from_secs_f64(state.settings.healthcheck_timeout);
    let store_check = tokio::time::timeout(deadline, state.store.health_check()).await;
    let store_status = match store_check {
        Ok(Ok(())) => Ok("healthy".to_string()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(format!("store health check timed out after {deadline:?}")),
    };

    let active_region = state.coordinator.active_region();
    let ready = store_status.is_ok() && active_region.is_some();
    Health {
        status: if ready { "ok" } else { "down" },
        version: env!("CARGO_PKG_VERSION"),
        active_region,
        regions: state.coordinator.snapshot(),
        store: Some(store_status.unwrap_or_else(|e| e)),
        status_code: if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
    }
}
