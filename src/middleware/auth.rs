//! Authentication middleware.
//!
//! Resolves credentials with [`CredentialValidator`] and either attaches the
//! resulting [`Identity`](crate::auth::Identity) to the request or answers
//! the request itself.
//!
//! # Modes
//!
//! - [`AuthMode::Standard`]: bearer header, token cookie, then legacy session
//!   cookie.
//! - [`AuthMode::Strict`]: tokens only. Failures clear the access and refresh
//!   cookies; successful responses get the fixed security headers.
//!
//! # Failure Shape
//!
//! API requests (path under the API prefix, or JSON in `Accept` /
//! `Content-Type`) get a `401` JSON body. Browser navigations are redirected
//! with `302` to `<login page>?redirect=<url-encoded path>`. Either shape
//! carries the `Set-Cookie` headers that clear rejected credentials.
//!
//! # Bypassed Endpoints
//!
//! Paths in `AUTH_BYPASS_PATHS` (default `/health`, `/ready`) skip
//! authentication. Matching is exact and case-sensitive: `/health/` is
//! still protected.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{
    ACCEPT, CONTENT_TYPE, HeaderName, LOCATION, SET_COOKIE, WWW_AUTHENTICATE,
};
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, client_ip};
use super::security_headers::apply_security_headers;
use crate::auth::cookies::clear_cookie;
use crate::auth::{AuthMode, CredentialValidator, Rejection, attach_identity};
use crate::config::Config;
use crate::metrics;

/// Request-shape settings shared by every auth layer instance.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub bypass_paths: Vec<String>,
    pub login_page_path: String,
    pub api_path_prefix: String,
    pub secure_cookies: bool,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bypass_paths: config.auth_bypass_paths.clone(),
            login_page_path: config.login_page_path.clone(),
            api_path_prefix: config.api_path_prefix.clone(),
            secure_cookies: config.secure_cookies,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// True when a failure should be answered with JSON rather than a redirect.
pub fn is_api_request(
    path: &str,
    accept: Option<&str>,
    content_type: Option<&str>,
    api_prefix: &str,
) -> bool {
    let wants_json = |value: Option<&str>| {
        value.is_some_and(|v| v.to_ascii_lowercase().contains("application/json"))
    };
    path.starts_with(api_prefix) || wants_json(accept) || wants_json(content_type)
}

/// Authentication layer.
#[derive(Clone)]
pub struct AuthLayer {
    validator: Arc<CredentialValidator>,
    mode: AuthMode,
    settings: Arc<AuthSettings>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl AuthLayer {
    pub fn new(
        validator: Arc<CredentialValidator>,
        mode: AuthMode,
        settings: Arc<AuthSettings>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            validator,
            mode,
            settings,
            trusted_proxies,
        }
    }

    pub fn standard(
        validator: Arc<CredentialValidator>,
        settings: Arc<AuthSettings>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self::new(validator, AuthMode::Standard, settings, trusted_proxies)
    }

    pub fn strict(
        validator: Arc<CredentialValidator>,
        settings: Arc<AuthSettings>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self::new(validator, AuthMode::Strict, settings, trusted_proxies)
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            validator: self.validator.clone(),
            mode: self.mode,
            settings: self.settings.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Authentication service wrapper.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    validator: Arc<CredentialValidator>,
    mode: AuthMode,
    settings: Arc<AuthSettings>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let validator = self.validator.clone();
        let mode = self.mode;
        let settings = self.settings.clone();
        let trusted_proxies = self.trusted_proxies.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path();
            if settings.bypass_paths.iter().any(|p| p == path) {
                debug!(path, "Bypassing auth");
                return inner.call(req).await;
            }

            let resolved = validator.resolve(req.headers(), mode).await;
            match resolved {
                Ok(resolution) => {
                    metrics::record_auth_success(resolution.source.as_str());
                    debug!(
                        user_id = %resolution.identity.id,
                        source = resolution.source.as_str(),
                        "Authenticated"
                    );
                    attach_identity(&mut req, resolution.identity);

                    let mut response = inner.call(req).await?;
                    if mode == AuthMode::Strict {
                        apply_security_headers(response.headers_mut());
                    }
                    Ok(response)
                }
                Err(rejection) => {
                    metrics::record_auth_failure(rejection.error.kind());
                    warn!(
                        path = %req.uri().path(),
                        client_ip = %client_ip(&req, &trusted_proxies),
                        reason = rejection.error.kind(),
                        mode = ?mode,
                        "Authentication failed"
                    );
                    Ok(failure_response(&req, rejection, &settings))
                }
            }
        })
    }
}

/// Build the 401 or redirect response for a rejected request.
fn failure_response<B>(req: &Request<B>, rejection: Rejection, settings: &AuthSettings) -> Response<Body> {
    let headers = req.headers();
    let path = req.uri().path();
    let header_str = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    let mut response = if is_api_request(
        path,
        header_str(ACCEPT),
        header_str(CONTENT_TYPE),
        &settings.api_path_prefix,
    ) {
        let mut response = rejection.error.into_response();
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    } else {
        let location = format!(
            "{}?redirect={}",
            settings.login_page_path,
            urlencoding::encode(path)
        );
        match HeaderValue::from_str(&location) {
            Ok(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
            Err(_) => rejection.error.into_response(),
        }
    };

    for name in &rejection.clear_cookies {
        if let Some(cookie) = clear_cookie(name, settings.secure_cookies) {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
    }
    response
}
