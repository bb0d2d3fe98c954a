//! Authorization code flow request and response shapes

use crate::roles::RoleTier;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Query parameters for the authorization endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeQuery {
    /// Client identifier, must be pre-registered
    pub client_id: String,
    /// Redirect URI, must exactly match the registered value
    pub redirect_uri: String,
    /// Subject the code is issued for; the client's default subject when absent
    pub subject: Option<String>,
    /// Tenant the caller believes it is acting in; must agree with the
    /// client's registration when supplied
    pub tenant_hint: Option<String>,
    /// Opaque value echoed back on the redirect
    pub state: Option<String>,
}

/// Body of the code exchange endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// The single-use authorization code
    pub code: String,
    pub client_id: String,
    /// Must match the redirect URI the code was issued against
    pub redirect_uri: String,
    /// Tenant the caller believes it is acting in; rejected when it does not
    /// match the client's tenant
    pub tenant_hint: Option<String>,
}

/// Successful code exchange.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// Bearer token for the new session
    pub session_token: String,
    /// Epoch seconds at which the session expires
    pub expires_at: i64,
    pub role: RoleTier,
    pub scopes: Vec<String>,
}

/// Record behind an issued authorization code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedCode {
    pub client_id: String,
    pub tenant_id: String,
    pub subject_id: String,
    pub redirect_uri: String,
    /// Epoch seconds
    pub issued_at: i64,
    pub expires_at: i64,
    pub consumed: bool,
}
