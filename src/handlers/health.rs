//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness with version and uptime
//! - `GET /ready` - Returns 503 once shutdown has started
//!
//! Both paths are in the default authentication bypass list.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK while the process is serving.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint.
///
/// - 200 OK: accepting traffic
/// - 503 Service Unavailable: draining for shutdown
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.is_ready() {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_health_reports_version() {
        let state = AppState::from_config(Config::default()).unwrap();

        let Json(body) = health_check(State(state.clone())).await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_readiness_flips_on_shutdown() {
        let state = AppState::from_config(Config::default()).unwrap();
        assert_eq!(readiness_check(State(state.clone())).await, Ok(StatusCode::OK));

        state.shutdown().await;
        assert_eq!(
            readiness_check(State(state)).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );
    }
}
