//! Token-for-cookie exchange.
//!
//! `POST /api/auth/login` accepts a token in the body, validates it with the
//! configured token collaborator, and sets it as the `HttpOnly` auth cookie
//! so browser navigations authenticate through the cookie step. The route is
//! governed by the login rate limiter, not by the auth layers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use tracing::{info, instrument, warn};

use crate::audit::{ActionType, ActivityLogger};
use crate::auth::cookies::set_cookie;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{IdentityResponse, LoginRequest, LoginResponse};
use crate::state::AppState;

/// Lifetime of the issued auth cookie (8 hours).
pub const AUTH_COOKIE_MAX_AGE_SECS: u64 = 8 * 60 * 60;

/// Exchange a token for the auth cookie.
///
/// # Errors
///
/// - `BadRequest` when the token is blank
/// - `InvalidToken` when the token collaborator rejects it
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    audit: ActivityLogger,
    Json(request): Json<LoginRequest>,
) -> AppResult<Response> {
    let token = request.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("token must not be empty".to_string()));
    }

    let identity = match state.credentials.token_validator().validate_token(token).await {
        Ok(identity) => Arc::new(identity),
        Err(e) => {
            metrics::record_auth_failure("invalid_token");
            warn!(error = %e, "Login rejected");
            return Err(AppError::InvalidToken("login token rejected".to_string()));
        }
    };

    let cookie = set_cookie(
        &state.credentials.cookies().token,
        token,
        AUTH_COOKIE_MAX_AGE_SECS,
        state.config.secure_cookies,
    )
    .ok_or_else(|| AppError::BadRequest("token contains characters not allowed in a cookie".to_string()))?;

    info!(user_id = %identity.id, username = %identity.username, "Login succeeded");
    let _ = audit
        .identity(identity.clone())
        .action(ActionType::Login, "session", identity.id.clone())
        .description("Exchanged token for auth cookie")
        .record_success();

    let body = LoginResponse {
        user: IdentityResponse::from(&*identity),
        expires_in: AUTH_COOKIE_MAX_AGE_SECS,
    };

    Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
}
