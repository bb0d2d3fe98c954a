use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const AUTH_TAG: &str = "Authorization API";
pub(crate) const SESSION_TAG: &str = "Session API";

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = HEALTH_TAG, description = "Health and readiness endpoints"),
        (name = AUTH_TAG, description = "Authorization code issuance and exchange"),
        (name = SESSION_TAG, description = "Session verification and revocation"),
    ),
    info(
        title = "SallyPort Authentication Gateway",
        description = "Multi-tenant session and authorization broker behind a trusted edge",
        version = env!("CARGO_PKG_VERSION")
    )
)]
pub(crate) struct ApiDoc;
