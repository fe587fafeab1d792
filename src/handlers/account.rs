//! Endpoints that read the authenticated identity.
//!
//! Mounted behind the auth layers; the identity extractor fails with 401 if
//! they are ever reached without one.

use axum::Json;
use tracing::instrument;

use crate::audit::{ActionType, ActivityLogger};
use crate::auth::CurrentIdentity;
use crate::models::IdentityResponse;

/// `GET /api/me`: the caller's identity. Each call is audited.
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn me(identity: CurrentIdentity, audit: ActivityLogger) -> Json<IdentityResponse> {
    let body = IdentityResponse::from(&*identity);

    let _ = audit
        .action(ActionType::View, "profile", identity.id.clone())
        .description("Viewed own profile")
        .record_success();

    Json(body)
}

/// `GET /dashboard`: a browser page. Unauthenticated navigations are
/// redirected to the login page by the auth layer.
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn dashboard(identity: CurrentIdentity) -> String {
    format!("Welcome, {} ({})", identity.username, identity.role)
}

/// `GET /api/secure/me`: same as [`me`] behind strict authentication.
#[instrument(skip_all, fields(user_id = %identity.id))]
pub async fn secure_me(identity: CurrentIdentity) -> Json<IdentityResponse> {
    Json(IdentityResponse::from(&*identity))
}
