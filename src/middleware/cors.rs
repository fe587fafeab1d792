//! CORS enforcement layer.
//!
//! Every request is classified by [`classify`](super::origin::classify)
//! before it reaches the router:
//!
//! - Denied origins get an empty `403` and the inner service is never called.
//! - `OPTIONS` requests are answered here with `204` (preflight).
//! - Everything else passes through; allowed cross-origin responses get the
//!   echoed `Access-Control-Allow-Origin` plus credentials, methods, headers
//!   and max-age, and `Vary: Origin`.
//!
//! The wildcard `*` is never emitted since credentials are allowed.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, HOST, ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, client_ip};
use super::origin::{OriginDecision, OriginPolicy, classify};
use crate::error::AppError;
use crate::metrics;

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Authorization, Content-Type, Accept, X-Requested-With, X-Request-Id";
pub const PREFLIGHT_MAX_AGE_SECS: u32 = 86_400;

/// Write the CORS response headers for an allowed decision.
///
/// Same-origin decisions (nothing to echo) leave `headers` untouched.
pub fn apply_cors_headers(headers: &mut HeaderMap, decision: &OriginDecision) {
    let Some(origin) = decision.echoed_origin.as_deref() else {
        return;
    };
    let Ok(origin) = HeaderValue::from_str(origin) else {
        return;
    };

    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(PREFLIGHT_MAX_AGE_SECS));
    headers.append(VARY, HeaderValue::from_static("Origin"));
}

/// Origin-checking layer.
#[derive(Clone)]
pub struct CorsLayer {
    policy: Arc<OriginPolicy>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl CorsLayer {
    pub fn new(policy: Arc<OriginPolicy>, trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        Self {
            policy,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for CorsLayer {
    type Service = CorsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsService {
            inner,
            policy: self.policy.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// CORS service wrapper.
#[derive(Clone)]
pub struct CorsService<S> {
    inner: S,
    policy: Arc<OriginPolicy>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for CorsService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        let headers = req.headers();
        let decision = match headers.get(ORIGIN).map(|v| v.to_str()) {
            None => OriginDecision::same_origin(),
            // Non-ASCII origins cannot match anything
            Some(Err(_)) => OriginDecision::deny(),
            Some(Ok(origin)) => {
                let host = headers.get(HOST).and_then(|v| v.to_str().ok()).unwrap_or_default();
                classify(origin, host, &self.policy)
            }
        };

        if !decision.allowed {
            let origin = headers
                .get(ORIGIN)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_default();
            warn!(
                origin = %origin,
                client_ip = %client_ip(&req, &self.trusted_proxies),
                path = %req.uri().path(),
                "Origin not allowed"
            );
            metrics::record_cors_denied();
            return Box::pin(async move { Ok(AppError::OriginDenied { origin }.into_response()) });
        }

        if req.method() == Method::OPTIONS {
            debug!(path = %req.uri().path(), "Answering CORS preflight");
            let mut response = StatusCode::NO_CONTENT.into_response();
            apply_cors_headers(response.headers_mut(), &decision);
            return Box::pin(async move { Ok(response) });
        }

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            apply_cors_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/api/items",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "ok"
                    }
                }),
            )
            .layer(CorsLayer::new(
                Arc::new(OriginPolicy::default()),
                Arc::new(TrustedProxyConfig::default()),
            ))
    }

    fn request(method: Method, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri("/api/items")
            .header(HOST, "portal.example.com");
        if let Some(origin) = origin {
            builder = builder.header(ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_denied_origin_is_empty_403() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(request(Method::GET, Some("https://evil.example")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_allowed_origin_is_echoed() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(request(Method::GET, Some("http://192.168.1.20:3000")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "http://192.168.1.20:3000");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[VARY], "Origin");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_origin_passes_without_cors_headers() {
        let response = app(Arc::new(AtomicUsize::new(0)))
            .oneshot(request(Method::GET, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(response.headers().get(VARY).is_none());
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(request(Method::OPTIONS, Some("https://portal.example.com")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "https://portal.example.com");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_denied_preflight_is_403() {
        let response = app(Arc::new(AtomicUsize::new(0)))
            .oneshot(request(Method::OPTIONS, Some("http://8.8.8.8")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
