//! Authenticated identity and its request-scoped accessors.
//!
//! The auth middleware stores the resolved [`Identity`] in the request
//! extensions exactly once. Everything downstream reads it through the same
//! typed accessors:
//!
//! - [`CurrentIdentity`]: extractor that rejects with a 401 JSON body when absent
//! - `Option<CurrentIdentity>`: extractor for handlers that serve both cases
//! - [`IdentityExt`]: `current_identity()` / `current_role()` on requests and parts

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::Request;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Role of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Operator,
    Viewer,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
            Role::Other(name) => name,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Role::Admin,
            "operator" => Role::Operator,
            "viewer" | "readonly" => Role::Viewer,
            other => Role::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::from(raw.as_str()))
    }
}

/// Resolved authenticated principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub role: Role,
    /// Raw claims as returned by the validating collaborator
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
    pub fn new(id: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            role,
            claims: serde_json::Map::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }
}

/// Identity as stored in request extensions.
///
/// Shared behind an `Arc` so extractors and the activity logger can hold it
/// without cloning the claims map.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Arc<Identity>);

impl Deref for CurrentIdentity {
    type Target = Identity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Attach `identity` to the request extensions.
///
/// Returns `false` and leaves the existing identity untouched if one was
/// already attached.
pub fn attach_identity<B>(req: &mut Request<B>, identity: Identity) -> bool {
    if req.extensions().get::<CurrentIdentity>().is_some() {
        tracing::warn!(
            path = %req.uri().path(),
            "Identity already attached to request, keeping the first one"
        );
        return false;
    }
    req.extensions_mut()
        .insert(CurrentIdentity(Arc::new(identity)));
    true
}

/// Typed access to the request's resolved identity.
pub trait IdentityExt {
    /// The resolved identity, if authentication ran and succeeded.
    fn current_identity(&self) -> Option<&Identity>;

    /// Role of the resolved identity.
    fn current_role(&self) -> Option<&Role> {
        self.current_identity().map(|identity| &identity.role)
    }
}

impl<B> IdentityExt for Request<B> {
    fn current_identity(&self) -> Option<&Identity> {
        self.extensions()
            .get::<CurrentIdentity>()
            .map(|current| current.0.as_ref())
    }
}

impl IdentityExt for Parts {
    fn current_identity(&self) -> Option<&Identity> {
        self.extensions
            .get::<CurrentIdentity>()
            .map(|current| current.0.as_ref())
    }
}

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentIdentity>()
            .cloned()
            .ok_or(AppError::MissingCredentials)
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<CurrentIdentity>().cloned())
    }
}
