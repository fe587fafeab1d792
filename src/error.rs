use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Propagation
///
/// - `MissingCredentials`, `InvalidToken`, `InvalidSession` and `OriginDenied`
///   abort the request pipeline with a terminal response.
/// - `RateLimited` aborts before the guarded operation runs.
/// - `Persistence` is produced by audit stores and is always swallowed by the
///   activity logger; it only reaches a response if a handler returns it
///   explicitly.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No credentials presented")]
    MissingCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Origin not allowed: {origin}")]
    OriginDenied { origin: String },

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Failed to persist audit record: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// JSON error body shared by every structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            retry_after: None,
        }
    }
}

impl AppError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingCredentials
            | AppError::InvalidToken(_)
            | AppError::InvalidSession(_) => StatusCode::UNAUTHORIZED,
            AppError::OriginDenied { .. } => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::SerializationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Persistence(_) | AppError::Internal(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable label, used as a metrics/log dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MissingCredentials => "missing_credentials",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::InvalidSession(_) => "invalid_session",
            AppError::OriginDenied { .. } => "origin_denied",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Persistence(_) => "persistence_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
            AppError::ConfigError(_) => "config_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            // CORS rejections carry no body at all
            AppError::OriginDenied { .. } => return status.into_response(),

            AppError::RateLimited { retry_after_secs } => {
                let body = ErrorResponse {
                    status: "error",
                    message: "rate limit exceeded".to_string(),
                    retry_after: Some(*retry_after_secs),
                };
                let mut response = (status, axum::Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
                return response;
            }
            _ => {}
        }

        // Internal details are logged, never sent to clients
        let message = match &self {
            AppError::MissingCredentials => "Authentication required".to_string(),
            AppError::InvalidToken(_) => "Invalid or expired token".to_string(),
            AppError::InvalidSession(_) => "Invalid or expired session".to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::SerializationError(_) => "Malformed JSON in request body".to_string(),
            other => {
                tracing::error!(error = %other, "Request failed");
                "An internal error occurred. Please contact support if the issue persists."
                    .to_string()
            }
        };

        (status, axum::Json(ErrorResponse::new(message))).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_is_json_401() {
        let response = AppError::MissingCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Authentication required");
        assert!(body.get("retry_after").is_none());
    }

    #[tokio::test]
    async fn test_origin_denied_has_empty_body() {
        let response = AppError::OriginDenied {
            origin: "https://evil.example".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_carries_retry_after() {
        let response = AppError::RateLimited {
            retry_after_secs: 60,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");

        let body = body_json(response).await;
        assert_eq!(body["retry_after"], 60);
    }

    #[tokio::test]
    async fn test_internal_errors_are_sanitized() {
        let response = AppError::Persistence("db password wrong".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert!(!body["message"].as_str().unwrap().contains("password"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(AppError::MissingCredentials.kind(), "missing_credentials");
        assert_eq!(
            AppError::InvalidSession("gone".into()).kind(),
            "invalid_session"
        );
    }
}
