//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Generates X-Request-Id if absent
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response spans
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← 403 for untrusted origins, 204 for preflight
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if the general budget is spent (login paths skipped)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Per-route guard  │ ← Login limiter, or standard/strict authentication
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - Health & monitoring (no authentication)
//! - `/api/auth/login` - Token-for-cookie exchange (login limiter)
//! - `/api/me`, `/dashboard` - Standard authentication
//! - `/api/secure/me` - Strict authentication

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

use crate::audit::REQUEST_ID_HEADER;
use crate::handlers;
use crate::middleware::{AuthLayer, CorsLayer, RateLimitLayer};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Rate Limiting**: general layer enabled if `rate_limit_per_minute > 0`;
///   the login limiter always guards the login route
/// - **CORS**: loopback defaults unless `CORS_ALLOWED_ORIGINS` is set
/// - **Authentication**: attached per route group
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    // =========================================================================
    // Route Groups
    // =========================================================================
    let public = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check));

    let login = Router::new()
        .route("/api/auth/login", post(handlers::login))
        .route_layer(
            RateLimitLayer::new(state.login_limiter.clone(), state.trusted_proxies.clone())
                .with_status(config.rate_limit_status),
        );
    info!(
        per_minute = config.login_rate_limit_per_minute,
        "Login rate limiting enabled"
    );

    let protected = Router::new()
        .route("/api/me", get(handlers::me))
        .route("/dashboard", get(handlers::dashboard))
        .route_layer(AuthLayer::standard(
            state.credentials.clone(),
            state.auth_settings.clone(),
            state.trusted_proxies.clone(),
        ));

    let secure = Router::new()
        .route("/api/secure/me", get(handlers::secure_me))
        .route_layer(AuthLayer::strict(
            state.credentials.clone(),
            state.auth_settings.clone(),
            state.trusted_proxies.clone(),
        ));

    let mut router = public.merge(login).merge(protected).merge(secure);

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. General rate limiting (if enabled)
    if config.rate_limiting_enabled() {
        info!(
            per_minute = config.rate_limit_per_minute,
            whitelist = config.rate_limit_whitelist.len(),
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        router = router.layer(
            RateLimitLayer::new(state.general_limiter.clone(), state.trusted_proxies.clone())
                .with_skip_paths(config.login_paths.clone())
                .with_status(config.rate_limit_status),
        );
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_PER_MINUTE=0)");
    }

    // 3. CORS
    info!(
        explicit_origins = config.cors_allowed_origins.is_some(),
        "Origin checking enabled"
    );
    router = router.layer(CorsLayer::new(
        state.origin_policy.clone(),
        state.trusted_proxies.clone(),
    ));

    // 4. Echo the request id on the response
    router = router.layer(PropagateRequestIdLayer::x_request_id());

    // 5. Tracing
    router = router.layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
        )
    }));

    // 6. Request ID (outermost so every layer sees it)
    router = router.layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    router.with_state(state)
}
