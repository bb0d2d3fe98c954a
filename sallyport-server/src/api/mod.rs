pub(crate) mod edge;
pub(crate) mod health;
pub(crate) mod oauth;
pub(crate) mod session;

use crate::api::edge::require_edge;
use crate::state::AppState;
use axum::{middleware, Router};

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(protected_routes(state))
}

/// Routes that are only reachable through the trusted edge
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(oauth::router())
        .merge(session::router())
        .layer(middleware::from_fn_with_state(state.clone(), require_edge))
}
