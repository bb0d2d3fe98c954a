use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Terminal authentication failures. Surfaced as 4xx and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("redirect_uri does not match the registered value")]
    RedirectMismatch,
    #[error("authorization code is not recognized")]
    CodeInvalid,
    #[error("authorization code has expired")]
    CodeExpired,
    #[error("authorization code was already exchanged")]
    CodeAlreadyUsed,
    #[error("session token is not recognized")]
    SessionNotFound,
    #[error("session has expired")]
    SessionExpired,
    #[error("session has been revoked")]
    SessionRevoked,
    #[error("request did not arrive through the trusted edge")]
    EdgeUnverified,
}

impl AuthenticationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RedirectMismatch => "redirect_mismatch",
            Self::CodeInvalid => "code_invalid",
            Self::CodeExpired => "code_expired",
            Self::CodeAlreadyUsed => "code_already_used",
            Self::SessionNotFound => "session_not_found",
            Self::SessionExpired => "session_expired",
            Self::SessionRevoked => "session_revoked",
            Self::EdgeUnverified => "edge_unverified",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::RedirectMismatch
            | Self::CodeInvalid
            | Self::CodeExpired
            | Self::CodeAlreadyUsed => StatusCode::BAD_REQUEST,
            Self::SessionNotFound
            | Self::SessionExpired
            | Self::SessionRevoked
            | Self::EdgeUnverified => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Terminal authorization failures. Surfaced as 403 and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("session tenant does not match the resource tenant")]
    CrossTenantDenied,
    #[error("subject's role tier is below the required tier")]
    InsufficientRole,
}

impl AuthorizationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CrossTenantDenied => "cross_tenant_denied",
            Self::InsufficientRole => "insufficient_role",
        }
    }
}

/// Retryable failures. Retried internally with backoff, then surfaced as 503.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransientError {
    #[error("shared store did not answer within the configured timeout")]
    StoreTimeout,
    #[error("replica did not acknowledge within the replication window")]
    ReplicationLag,
}

impl TransientError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreTimeout => "store_timeout",
            Self::ReplicationLag => "replication_lag",
        }
    }
}

/// Top-level error type for every gateway operation.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Transient(#[from] TransientError),
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(e) => e.code(),
            Self::Authorization(e) => e.code(),
            Self::Transient(e) => e.code(),
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication(e) => e.status(),
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = json!({
            "error": self.code(),
            "detail": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(25);

/// Run an operation, retrying transient failures a bounded number of times
/// with doubling backoff. Terminal errors pass through untouched.
pub async fn with_retries<T, F, Fut>(op: &str, mut f: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut delay = BACKOFF_BASE;
    let mut attempt = 1;
    loop {
        match f().await {
            Err(GatewayError::Transient(e)) if attempt < MAX_ATTEMPTS => {
                log::warn!(
                    "{op} failed with transient error '{}' (attempt {attempt}/{MAX_ATTEMPTS}), retrying in {delay:?}",
                    e.code()
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}
