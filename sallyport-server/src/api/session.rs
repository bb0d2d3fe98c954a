//! Session verification and revocation endpoints

use crate::errors::{with_retries, AuthenticationError, GatewayError};
use crate::openapi::SESSION_TAG;
use crate::roles::RoleTier;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Tenant of the resource the caller wants to touch; when present the
/// session's tenant must match it exactly.
pub const RESOURCE_TENANT_HEADER: &str = "x-resource-tenant";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session/verify", get(verify))
        .route("/session/revoke", post(revoke))
}

/// Valid session, as reported to resource services.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyResponse {
    pub tenant_id: String,
    pub subject_id: String,
    pub role: RoleTier,
    pub scopes: Vec<String>,
    /// Epoch seconds
    pub expires_at: i64,
    pub last_seen: i64,
}

/// Extract the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .get(..7)
                .filter(|prefix| prefix.eq_ignore_ascii_case("bearer "))
                .map(|_| value[7..].trim())
        })
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AuthenticationError::SessionNotFound.into())
}

/// Session verification endpoint.
#[utoipa::path(
    get,
    path = "/session/verify",
    tag = SESSION_TAG,
    params(
        ("x-resource-tenant" = Option<String>, Header, description = "Tenant owning the target resource")
    ),
    responses(
        (status = 200, description = "Session is valid", body = VerifyResponse),
        (status = 401, description = "Missing, expired, or revoked session"),
        (status = 403, description = "Session tenant does not match the resource tenant"),
        (status = 503, description = "Store unavailable")
    )
)]
async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<VerifyResponse>, GatewayError> {
    let token = bearer_token(&headers)?;
    let resource_tenant = headers
        .get(RESOURCE_TENANT_HEADER)
        .and_then(|value| value.to_str().ok());

    let session = with_retries("verify_session", || {
        state.sessions.verify_session(token, resource_tenant)
    })
    .await?;
    Ok(Json(VerifyResponse {
        tenant_id: session.tenant_id,
        subject_id: session.subject_id,
        role: session.tier,
        scopes: session.scopes,
        expires_at: session.expires_at,
        last_seen: session.last_seen,
    }))
}

/// Session revocation endpoint. Idempotent.
#[utoipa::path(
    post,
    path = "/session/revoke",
    tag = SESSION_TAG,
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Missing or unknown session"),
        (status = 503, description = "Store unavailable")
    )
)]
async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, GatewayError> {
    let token = bearer_token(&headers)?;
    with_retries("revoke_session", || state.sessions.revoke_session(token)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::RESOURCE_TENANT_HEADER;
    use crate::test_utils::TestFixture;
    use http::StatusCode;

    #[tokio::test]
    async fn verify_without_a_bearer_token_is_unauthorized() {
        let fixture = TestFixture::new().await;
        let response = fixture.get("/session/verify").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.error_code(), "session_not_found");
    }

    #[tokio::test]
    async fn verify_checks_the_resource_tenant_header() {
        let fixture = TestFixture::new().await;
        let token = fixture.login("acme-portal").await;
        let auth = format!("Bearer {token}");

        let response = fixture
            .get_with_headers(
                "/session/verify",
                &[("Authorization", &auth), (RESOURCE_TENANT_HEADER, "acme")],
            )
            .await;
        response.assert_ok();

        let response = fixture
            .get_with_headers(
                "/session/verify",
                &[("Authorization", &auth), (RESOURCE_TENANT_HEADER, "globex")],
            )
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.error_code(), "cross_tenant_denied");
    }

    #[tokio::test]
    async fn revoked_sessions_stop_verifying() {
        let fixture = TestFixture::new().await;
        let token = fixture.login("acme-portal").await;
        let auth = format!("Bearer {token}");

        let response = fixture
            .post_with_headers("/session/revoke", &serde_json::json!({}), &[("Authorization", &auth)])
            .await;
        response.assert_status(StatusCode::NO_CONTENT);

        let response = fixture
            .get_with_headers("/session/verify", &[("Authorization", &auth)])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.error_code(), "session_revoked");

        // revocation is idempotent
        let response = fixture
            .post_with_headers("/session/revoke", &serde_json::json!({}), &[("Authorization", &auth)])
            .await;
        response.assert_status(StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn sessions_survive_region_failover_with_the_same_expiry() {
        let fixture = TestFixture::new().await;
        let token = fixture.login("acme-portal").await;
        let auth = format!("Bearer {token}");

        let before = fixture
            .get_with_headers("/session/verify", &[("Authorization", &auth)])
            .await;
        before.assert_ok();
        let expires_at = before.json["expires_at"].as_i64().unwrap();

        fixture.state.coordinator.apply_health("us-west", false);
        assert_eq!(
            fixture.state.coordinator.active_region().as_deref(),
            Some("eu-central")
        );

        let after = fixture
            .get_with_headers("/session/verify", &[("Authorization", &auth)])
            .await;
        after.assert_ok();
        assert_eq!(after.json["expires_at"].as_i64().unwrap(), expires_at);
    }
}
