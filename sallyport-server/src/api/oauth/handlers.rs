//! Authorization code flow endpoint handlers

use crate::api::oauth::models::{AuthorizeQuery, TokenRequest, TokenResponse};
use crate::errors::{with_retries, AuthenticationError, GatewayError};
use crate::openapi::AUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use log::{info, warn};
use url::Url;

/// Authorization endpoint.
///
/// Issues a single-use code for a registered client and redirects back to
/// the registered URI with `code` (and the echoed `state`) appended. An
/// unknown client or a redirect URI that differs from the registered one in
/// any way is a mismatch; nothing is ever sent to an unregistered URI.
#[utoipa::path(
    get,
    path = "/authorize",
    tag = AUTH_TAG,
    params(
        ("client_id" = String, Query, description = "Registered client identifier"),
        ("redirect_uri" = String, Query, description = "Must equal the registered redirect URI"),
        ("subject" = Option<String>, Query, description = "Subject to issue the code for"),
        ("tenant_hint" = Option<String>, Query, description = "Tenant the caller expects to act in"),
        ("state" = Option<String>, Query, description = "Opaque value echoed on the redirect")
    ),
    responses(
        (status = 302, description = "Redirect to the registered URI with the code appended"),
        (status = 400, description = "Unknown client or mismatched redirect URI"),
        (status = 401, description = "Request did not arrive through the trusted edge"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, GatewayError> {
    info!("Authorization request from client '{}'", query.client_id);

    let Some(client) = state.settings.client(&query.client_id) else {
        warn!("Authorization request from unknown client '{}'", query.client_id);
        return Err(AuthenticationError::RedirectMismatch.into());
    };

    let code = with_retries("issue_code", || {
        state.broker.issue_code(
            client,
            &query.redirect_uri,
            query.subject.as_deref(),
            query.tenant_hint.as_deref(),
        )
    })
    .await?;

    // The code was minted against the registered URI, so redirect to that,
    // never to anything request-supplied
    let mut location = Url::parse(&client.redirect_uri)
        .map_err(|e| GatewayError::Internal(format!("Registered redirect URI is invalid: {e}")))?;
    {
        let mut pairs = location.query_pairs_mut();
        pairs.append_pair("code", &code);
        if let Some(s) = &query.state {
            pairs.append_pair("state", s);
        }
    }

    Ok((StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response())
}

/// Code exchange endpoint.
///
/// Consumes the single-use code and answers with a bearer token for the new
/// session. Concurrent exchanges of the same code admit exactly one winner.
#[utoipa::path(
    post,
    path = "/token",
    tag = AUTH_TAG,
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Code exchanged for a session token", body = TokenResponse),
        (status = 400, description = "Invalid, expired, or already-used code"),
        (status = 401, description = "Request did not arrive through the trusted edge"),
        (status = 403, description = "Tenant mismatch or insufficient role tier"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, GatewayError> {
    let Some(client) = state.settings.client(&request.client_id) else {
        warn!("Token request from unknown client '{}'", request.client_id);
        return Err(AuthenticationError::CodeInvalid.into());
    };

    // Not retried: once the swap has landed, a retry would read its own tombstone
    let session = state
        .broker
        .exchange_code(
            client,
            &request.code,
            &request.redirect_uri,
            request.tenant_hint.as_deref(),
        )
        .await?;

    Ok(Json(TokenResponse {
        session_token: session.token,
        expires_at: session.expires_at,
        role: session.tier,
        scopes: session.scopes,
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::oauth::models::TokenResponse;
    use crate::roles::RoleTier;
    use crate::test_utils::TestFixture;
    use http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn authorize_redirects_to_the_registered_uri_with_a_code() {
        let fixture = TestFixture::new().await;

        let response = fixture
            .get("/authorize?client_id=acme-portal&redirect_uri=https%3A%2F%2Fa.example%2Fcb&state=xyzzy")
            .await;
        response.assert_status(StatusCode::FOUND);

        let location = response.location();
        assert_eq!(location.host_str(), Some("a.example"));
        assert_eq!(location.path(), "/cb");
        assert!(!response.location_param("code").is_empty());
        assert_eq!(response.location_param("state"), "xyzzy");
    }

    #[tokio::test]
    async fn unknown_client_gets_no_redirect() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .get("/authorize?client_id=who-dis&redirect_uri=https%3A%2F%2Fa.example%2Fcb")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.error_code(), "redirect_mismatch");
    }

    #[tokio::test]
    async fn mismatched_redirect_uri_is_rejected_without_a_redirect() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .get("/authorize?client_id=acme-portal&redirect_uri=https%3A%2F%2Fevil.example%2Fcb")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.error_code(), "redirect_mismatch");
        assert!(response.headers.get(http::header::LOCATION).is_none());
    }

    #[tokio::test]
    async fn full_code_flow_yields_a_working_session() {
        let fixture = TestFixture::new().await;
        let token = fixture.login("acme-portal").await;

        let response = fixture
            .get_with_headers(
                "/session/verify",
                &[("Authorization", &format!("Bearer {token}"))],
            )
            .await;
        response.assert_ok();
        assert_eq!(response.json["tenant_id"], "acme");
        assert_eq!(response.json["subject_id"], "svc-acme");
        assert_eq!(response.json["role"], "emerald");
    }

    #[tokio::test]
    async fn token_response_carries_tier_and_scopes() {
        let fixture = TestFixture::new().await;

        let response = fixture
            .get("/authorize?client_id=globex-portal&redirect_uri=https%3A%2F%2Fb.example%2Fcb")
            .await;
        response.assert_status(StatusCode::FOUND);
        let code = response.location_param("code");

        let response = fixture
            .post(
                "/token",
                &json!({
                    "code": code,
                    "client_id": "globex-portal",
                    "redirect_uri": "https://b.example/cb",
                }),
            )
            .await;
        response.assert_ok();
        let body: TokenResponse = response.json_as();
        assert_eq!(body.role, RoleTier::Diamond);
        assert!(body.scopes.contains(&"admin".to_string()));
        assert!(body.expires_at > chrono::Utc::now().timestamp());
        assert!(body.session_token.starts_with("globex."));
    }

    #[tokio::test]
    async fn a_code_cannot_be_exchanged_twice() {
        let fixture = TestFixture::new().await;

        let response = fixture
            .get("/authorize?client_id=acme-portal&redirect_uri=https%3A%2F%2Fa.example%2Fcb")
            .await;
        let code = response.location_param("code");

        let body = json!({
            "code": code,
            "client_id": "acme-portal",
            "redirect_uri": "https://a.example/cb",
        });
        fixture.post("/token", &body).await.assert_ok();

        let replay = fixture.post("/token", &body).await;
        replay.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(replay.error_code(), "code_already_used");
    }

    #[tokio::test]
    async fn tenant_hint_mismatch_is_forbidden() {
        let fixture = TestFixture::new().await;

        let response = fixture
            .get("/authorize?client_id=acme-portal&redirect_uri=https%3A%2F%2Fa.example%2Fcb")
            .await;
        let code = response.location_param("code");

        let response = fixture
            .post(
                "/token",
                &json!({
                    "code": code,
                    "client_id": "acme-portal",
                    "redirect_uri": "https://a.example/cb",
                    "tenant_hint": "globex",
                }),
            )
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.error_code(), "cross_tenant_denied");
    }

    #[tokio::test]
    async fn admin_client_floor_rejects_low_tier_subjects() {
        let fixture = TestFixture::new().await;

        let response = fixture
            .get("/authorize?client_id=acme-admin&redirect_uri=https%3A%2F%2Fadmin.a.example%2Fcb")
            .await;
        response.assert_status(StatusCode::FOUND);
        let code = response.location_param("code");

        let response = fixture
            .post(
                "/token",
                &json!({
                    "code": code,
                    "client_id": "acme-admin",
                    "redirect_uri": "https://admin.a.example/cb",
                }),
            )
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(response.error_code(), "insufficient_role");
    }
}
