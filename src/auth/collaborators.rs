//! External collaborators consulted by the credential validator.
//!
//! The middleware only depends on the traits. Token and session lookups may
//! perform I/O, so they are async and cancelled with the request future.
//! Two in-process implementations ship with the crate for the binary and tests.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::identity::{Identity, Role};
use crate::error::{AppError, AppResult};

/// Validates bearer/cookie tokens.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Resolve `token` to an identity, or fail with [`AppError::InvalidToken`].
    async fn validate_token(&self, token: &str) -> AppResult<Identity>;
}

/// Validates legacy opaque session identifiers.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Resolve `session_id` to an identity, or fail with [`AppError::InvalidSession`].
    async fn validate_session(&self, session_id: &str) -> AppResult<Identity>;
}

/// Decides which client keys are exempt from rate limiting.
pub trait WhitelistPolicy: Send + Sync {
    fn is_whitelisted(&self, ip: &str) -> bool;
}

// =============================================================================
// Static token validator
// =============================================================================

/// Token validator backed by a fixed token list.
///
/// Every lookup compares against all entries in constant time so response
/// latency does not reveal how much of a token matched.
#[derive(Default)]
pub struct StaticTokenValidator {
    entries: Vec<(String, Identity)>,
}

impl fmt::Debug for StaticTokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenValidator")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` as resolving to `identity`.
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.entries.push((token.into(), identity));
        self
    }

    /// Build from `token=id:username:role` entries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for malformed entries.
    pub fn from_specs(specs: &[String]) -> AppResult<Self> {
        specs.iter().enumerate().try_fold(Self::new(), |validator, (index, spec)| {
            let (token, identity) = parse_token_spec(index, spec)?;
            Ok(validator.with_token(token, identity))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Errors name the entry position only; the entry itself contains a secret.
fn parse_token_spec(index: usize, spec: &str) -> AppResult<(String, Identity)> {
    let malformed = || {
        AppError::ConfigError(format!(
            "Invalid static token entry #{index} (expected token=id:username:role)"
        ))
    };

    let (token, rest) = spec.split_once('=').ok_or_else(malformed)?;
    let mut fields = rest.splitn(3, ':');
    let (Some(id), Some(username), Some(role)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed());
    };

    let token = token.trim();
    if token.is_empty() || id.trim().is_empty() || username.trim().is_empty() {
        return Err(malformed());
    }

    Ok((
        token.to_string(),
        Identity::new(id.trim(), username.trim(), Role::from(role)),
    ))
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate_token(&self, token: &str) -> AppResult<Identity> {
        let mut found = None;
        for (candidate, identity) in &self.entries {
            if bool::from(candidate.as_bytes().ct_eq(token.as_bytes())) {
                found = Some(identity);
            }
        }

        found
            .cloned()
            .ok_or_else(|| AppError::InvalidToken("unknown token".to_string()))
    }
}

// =============================================================================
// In-memory session store
// =============================================================================

#[derive(Debug, Clone)]
struct SessionEntry {
    identity: Identity,
    expires_at: DateTime<Utc>,
}

/// Session validator backed by an in-process map with expiry.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session valid for `ttl` from now.
    pub fn insert(&self, session_id: impl Into<String>, identity: Identity, ttl: Duration) {
        self.sessions.write().insert(
            session_id.into(),
            SessionEntry {
                identity,
                expires_at: Utc::now() + ttl,
            },
        );
    }

    /// Remove a session. Returns whether it existed.
    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionValidator for InMemorySessionStore {
    async fn validate_session(&self, session_id: &str) -> AppResult<Identity> {
        let entry = self.sessions.read().get(session_id).cloned();

        match entry {
            Some(entry) if entry.expires_at > Utc::now() => Ok(entry.identity),
            Some(_) => {
                debug!("Session expired");
                Err(AppError::InvalidSession("session expired".to_string()))
            }
            None => Err(AppError::InvalidSession("unknown session".to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_validator() {
        let validator = StaticTokenValidator::new()
            .with_token("good-token", Identity::new("1", "alice", Role::Admin));

        let identity = validator.validate_token("good-token").await.unwrap();
        assert_eq!(identity.username, "alice");

        let err = validator.validate_token("good-tokeN").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidToken(_)));
        assert!(validator.validate_token("").await.is_err());
    }

    #[test]
    fn test_from_specs() {
        let specs = vec![
            "abc123=1:alice:admin".to_string(),
            "def456=2:bob:viewer".to_string(),
        ];
        let validator = StaticTokenValidator::from_specs(&specs).unwrap();
        assert_eq!(validator.len(), 2);
    }

    #[test]
    fn test_from_specs_rejects_malformed() {
        for bad in ["no-equals", "tok=1:alice", "=1:alice:admin", "tok=:alice:admin"] {
            let result = StaticTokenValidator::from_specs(&[bad.to_string()]);
            assert!(
                matches!(result, Err(AppError::ConfigError(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_malformed_spec_error_does_not_echo_token() {
        let err = StaticTokenValidator::from_specs(&["supersecret=1".to_string()]).unwrap_err();
        assert!(!err.to_string().contains("supersecret"));
    }

    #[tokio::test]
    async fn test_session_store_lifecycle() {
        let store = InMemorySessionStore::new();
        store.insert("s1", Identity::new("7", "carol", Role::Operator), Duration::hours(1));
        store.insert("old", Identity::new("8", "dave", Role::Viewer), Duration::seconds(-5));

        assert_eq!(store.validate_session("s1").await.unwrap().id, "7");
        assert!(matches!(
            store.validate_session("old").await,
            Err(AppError::InvalidSession(_))
        ));
        assert!(matches!(
            store.validate_session("missing").await,
            Err(AppError::InvalidSession(_))
        ));

        assert_eq!(store.purge_expired(), 1);
        assert!(store.revoke("s1"));
        assert!(store.is_empty());
    }
}
