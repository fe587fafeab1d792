//! Request and response bodies of the bundled endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{Identity, Role};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Service version
    pub version: String,
    /// Seconds since startup
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Public view of an authenticated identity. Claims are not exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub id: String,
    pub username: String,
    pub role: Role,
}

impl From<&Identity> for IdentityResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            username: identity.username.clone(),
            role: identity.role.clone(),
        }
    }
}

/// Token-for-cookie exchange request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

/// Token-for-cookie exchange response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: IdentityResponse,
    /// Lifetime of the issued cookie in seconds
    pub expires_in: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_response_hides_claims() {
        let identity = Identity::new("7", "carol", Role::Operator)
            .with_claim("secret", serde_json::json!("do-not-leak"));

        let json = serde_json::to_string(&IdentityResponse::from(&identity)).unwrap();
        assert_eq!(json, r#"{"id":"7","username":"carol","role":"operator"}"#);
    }

    #[test]
    fn test_login_request_deserialization() {
        let request: LoginRequest = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(request.token, "abc");

        assert!(serde_json::from_str::<LoginRequest>("{}").is_err());
    }
}
