//! Authorization code flow: code issuance and exchange.
//!
//! A simplified authorization-code grant for service subjects sitting behind
//! the trusted edge. Codes are single-use, bound to a registered client and
//! its exact redirect URI, and consumed atomically so a replayed or raced
//! exchange can never mint a second session.

pub mod broker;
pub mod handlers;
pub mod models;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authorize", get(handlers::authorize))
        .route("/token", post(handlers::token))
}
