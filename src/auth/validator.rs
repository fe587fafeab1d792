//! Dual-mode credential resolution.
//!
//! # Resolution Order
//!
//! First success wins; each step runs independently of the others:
//!
//! 1. `Authorization: Bearer <token>` header → [`TokenValidator`]
//! 2. Token cookie → [`TokenValidator`]
//! 3. Legacy session cookie → [`SessionValidator`] (standard mode only)
//!
//! A request without any credential material fails with
//! `MissingCredentials` before any collaborator is contacted. A failed
//! session lookup always asks the caller to clear the session cookie, so a
//! dead session is never retried on the next request.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use tracing::{debug, warn};

use super::collaborators::{SessionValidator, TokenValidator};
use super::cookies::cookie_value;
use super::identity::Identity;
use crate::config::CookieNames;
use crate::error::AppError;
use crate::metrics;

/// Which resolution path a middleware instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Token first, then legacy session fallback.
    Standard,
    /// Token only. Failures clear both token cookies; successes get
    /// security headers.
    Strict,
}

/// Where the credential that resolved the identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    BearerHeader,
    TokenCookie,
    SessionCookie,
}

impl CredentialSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialSource::BearerHeader => "bearer_header",
            CredentialSource::TokenCookie => "token_cookie",
            CredentialSource::SessionCookie => "session_cookie",
        }
    }
}

/// Successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub identity: Identity,
    pub source: CredentialSource,
}

/// Failed resolution: the error plus the cookies the response must clear.
#[derive(Debug)]
pub struct Rejection {
    pub error: AppError,
    pub clear_cookies: Vec<String>,
}

/// Resolves request credentials to an [`Identity`].
#[derive(Clone)]
pub struct CredentialValidator {
    tokens: Arc<dyn TokenValidator>,
    sessions: Option<Arc<dyn SessionValidator>>,
    cookies: CookieNames,
}

impl fmt::Debug for CredentialValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialValidator")
            .field("session_fallback", &self.sessions.is_some())
            .field("cookies", &self.cookies)
            .finish()
    }
}

impl CredentialValidator {
    /// Create a validator.
    ///
    /// Without a session validator, standard mode never attempts step 3.
    pub fn new(
        tokens: Arc<dyn TokenValidator>,
        sessions: Option<Arc<dyn SessionValidator>>,
        cookies: CookieNames,
    ) -> Self {
        Self {
            tokens,
            sessions,
            cookies,
        }
    }

    pub fn cookies(&self) -> &CookieNames {
        &self.cookies
    }

    /// Access the token collaborator (used by the login exchange).
    pub fn token_validator(&self) -> &Arc<dyn TokenValidator> {
        &self.tokens
    }

    /// Resolve the request's credentials.
    ///
    /// # Errors
    ///
    /// - `MissingCredentials` when no credential material is present
    /// - `InvalidSession` when the session step ran and failed
    /// - `InvalidToken` when token material was present and every step failed
    pub async fn resolve(&self, headers: &HeaderMap, mode: AuthMode) -> Result<Resolution, Rejection> {
        let bearer = bearer_token(headers);
        let token_cookie = cookie_value(headers, &self.cookies.token);
        let session = match (mode, &self.sessions) {
            (AuthMode::Standard, Some(sessions)) => {
                cookie_value(headers, &self.cookies.session).map(|id| (id, sessions))
            }
            _ => None,
        };

        if bearer.is_none() && token_cookie.is_none() && session.is_none() {
            return Err(self.reject(AppError::MissingCredentials, mode, false));
        }

        let mut last_error = None;

        let token_steps = [
            (bearer, CredentialSource::BearerHeader),
            (token_cookie, CredentialSource::TokenCookie),
        ];
        for (token, source) in token_steps {
            let Some(token) = token else { continue };
            match self.validate_token(token, source).await {
                Ok(identity) => return Ok(Resolution { identity, source }),
                Err(e) => last_error = Some(e),
            }
        }

        if let Some((session_id, sessions)) = session {
            let started = Instant::now();
            let result = sessions.validate_session(session_id).await;
            metrics::record_validation_duration(
                CredentialSource::SessionCookie.as_str(),
                started.elapsed().as_secs_f64(),
            );

            return match result {
                Ok(identity) => Ok(Resolution {
                    identity,
                    source: CredentialSource::SessionCookie,
                }),
                Err(e) => {
                    debug!(error = %e, "Session validation failed");
                    let error = match e {
                        AppError::InvalidSession(reason) => AppError::InvalidSession(reason),
                        other => AppError::InvalidSession(other.to_string()),
                    };
                    Err(self.reject(error, mode, true))
                }
            };
        }

        let error = last_error.unwrap_or(AppError::MissingCredentials);
        Err(self.reject(error, mode, false))
    }

    async fn validate_token(&self, token: &str, source: CredentialSource) -> Result<Identity, AppError> {
        let started = Instant::now();
        let result = self.tokens.validate_token(token).await;
        metrics::record_validation_duration(source.as_str(), started.elapsed().as_secs_f64());

        result.map_err(|e| {
            debug!(source = source.as_str(), error = %e, "Token validation failed");
            match e {
                AppError::InvalidToken(reason) => AppError::InvalidToken(reason),
                other => {
                    warn!(error = %other, "Token validator returned an unexpected error");
                    AppError::InvalidToken(other.to_string())
                }
            }
        })
    }

    fn reject(&self, error: AppError, mode: AuthMode, session_attempted: bool) -> Rejection {
        let mut clear_cookies = Vec::new();
        if mode == AuthMode::Strict {
            clear_cookies.push(self.cookies.token.clone());
            clear_cookies.push(self.cookies.refresh.clone());
        }
        if session_attempted {
            clear_cookies.push(self.cookies.session.clone());
        }
        Rejection {
            error,
            clear_cookies,
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively; an empty token counts as absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::collaborators::StaticTokenValidator;
    use crate::auth::identity::Role;
    use crate::error::AppResult;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Session validator that counts calls and only knows "live-session".
    #[derive(Default)]
    struct CountingSessions {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionValidator for CountingSessions {
        async fn validate_session(&self, session_id: &str) -> AppResult<Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if session_id == "live-session" {
                Ok(Identity::new("9", "legacy", Role::Viewer))
            } else {
                Err(AppError::InvalidSession("unknown session".to_string()))
            }
        }
    }

    fn validator(sessions: Arc<CountingSessions>) -> CredentialValidator {
        let tokens = StaticTokenValidator::new()
            .with_token("good-token", Identity::new("1", "alice", Role::Admin));
        CredentialValidator::new(Arc::new(tokens), Some(sessions), CookieNames::default())
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[tokio::test]
    async fn test_bearer_success_never_touches_sessions() {
        let sessions = Arc::new(CountingSessions::default());
        let v = validator(sessions.clone());

        let resolved = v
            .resolve(
                &headers(&[("authorization", "Bearer good-token")]),
                AuthMode::Standard,
            )
            .await
            .unwrap();

        assert_eq!(resolved.source, CredentialSource::BearerHeader);
        assert_eq!(resolved.identity.username, "alice");
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bearer_success_with_dead_session_cookie_present() {
        let sessions = Arc::new(CountingSessions::default());
        let v = validator(sessions.clone());

        let resolved = v
            .resolve(
                &headers(&[
                    ("authorization", "Bearer good-token"),
                    ("cookie", "session_id=dead"),
                ]),
                AuthMode::Standard,
            )
            .await
            .unwrap();

        assert_eq!(resolved.source, CredentialSource::BearerHeader);
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_bearer_falls_back_to_cookie_token() {
        let v = validator(Arc::new(CountingSessions::default()));

        let resolved = v
            .resolve(
                &headers(&[
                    ("authorization", "Bearer stale"),
                    ("cookie", "auth_token=good-token"),
                ]),
                AuthMode::Standard,
            )
            .await
            .unwrap();

        assert_eq!(resolved.source, CredentialSource::TokenCookie);
    }

    #[tokio::test]
    async fn test_invalid_token_falls_back_to_session() {
        let sessions = Arc::new(CountingSessions::default());
        let v = validator(sessions.clone());

        let resolved = v
            .resolve(
                &headers(&[("cookie", "auth_token=stale; session_id=live-session")]),
                AuthMode::Standard,
            )
            .await
            .unwrap();

        assert_eq!(resolved.source, CredentialSource::SessionCookie);
        assert_eq!(resolved.identity.id, "9");
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_contacts_nobody() {
        let sessions = Arc::new(CountingSessions::default());
        let v = validator(sessions.clone());

        let rejection = v
            .resolve(&headers(&[("cookie", "theme=dark")]), AuthMode::Standard)
            .await
            .unwrap_err();

        assert!(matches!(rejection.error, AppError::MissingCredentials));
        assert!(rejection.clear_cookies.is_empty());
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dead_session_is_cleared_every_time() {
        let sessions = Arc::new(CountingSessions::default());
        let v = validator(sessions.clone());
        let request = headers(&[("cookie", "session_id=dead")]);

        for attempt in 1..=3 {
            let rejection = v.resolve(&request, AuthMode::Standard).await.unwrap_err();
            assert!(matches!(rejection.error, AppError::InvalidSession(_)));
            assert_eq!(rejection.clear_cookies, vec!["session_id".to_string()]);
            assert_eq!(sessions.calls.load(Ordering::SeqCst), attempt);
        }
    }

    #[tokio::test]
    async fn test_invalid_token_only() {
        let v = validator(Arc::new(CountingSessions::default()));

        let rejection = v
            .resolve(&headers(&[("authorization", "Bearer nope")]), AuthMode::Standard)
            .await
            .unwrap_err();

        assert!(matches!(rejection.error, AppError::InvalidToken(_)));
        assert!(rejection.clear_cookies.is_empty());
    }

    #[tokio::test]
    async fn test_strict_mode_ignores_sessions_and_clears_token_cookies() {
        let sessions = Arc::new(CountingSessions::default());
        let v = validator(sessions.clone());

        let rejection = v
            .resolve(
                &headers(&[("cookie", "session_id=live-session")]),
                AuthMode::Strict,
            )
            .await
            .unwrap_err();

        assert!(matches!(rejection.error, AppError::MissingCredentials));
        assert_eq!(
            rejection.clear_cookies,
            vec!["auth_token".to_string(), "refresh_token".to_string()]
        );
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_strict_mode_accepts_cookie_token() {
        let v = validator(Arc::new(CountingSessions::default()));

        let resolved = v
            .resolve(&headers(&[("cookie", "auth_token=good-token")]), AuthMode::Strict)
            .await
            .unwrap();

        assert_eq!(resolved.source, CredentialSource::TokenCookie);
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(
            bearer_token(&headers(&[("authorization", "Bearer abc")])),
            Some("abc")
        );
        assert_eq!(
            bearer_token(&headers(&[("authorization", "bearer   abc ")])),
            Some("abc")
        );
        assert_eq!(bearer_token(&headers(&[("authorization", "Basic abc")])), None);
        assert_eq!(bearer_token(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
