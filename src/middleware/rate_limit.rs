//! Per-client rate limiting using the token bucket algorithm.
//!
//! # Algorithm
//!
//! Each bucket is a Governor direct limiter implementing the Generic Cell
//! Rate Algorithm (GCRA). For a budget of N requests per minute:
//!
//! - capacity (burst) is `max(N, 1)`
//! - refill rate is `max(N / 60, 1)` tokens per second
//!
//! A fresh client can therefore spend its whole minute budget immediately,
//! and recovers at least one token per second afterwards.
//!
//! # Registries
//!
//! A [`RateLimiterRegistry`] owns the buckets for one [`LimiterScope`].
//! General traffic and login attempts use separate registries, so a burst
//! of failed logins never drains the general budget and vice versa. Buckets
//! are created lazily per client IP and evicted by [`RateLimiterRegistry::sweep_idle`].
//!
//! # Response Headers
//!
//! On rejection (default 429):
//! - `Retry-After`: configured retry hint in seconds
//! - `X-RateLimit-Limit`: configured per-minute budget
//! - `X-RateLimit-Remaining`: `0`
//!
//! On pass-through, `X-RateLimit-Limit` and `X-RateLimit-Remaining` reflect
//! the bucket state after the request was counted.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{CidrRange, TrustedProxyConfig, client_ip, parse_cidr_list};
use crate::auth::WhitelistPolicy;
use crate::error::{AppError, AppResult};
use crate::metrics;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Single-key GCRA limiter that reports remaining capacity on success.
type BucketLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;

/// Which budget a registry enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterScope {
    General,
    Login,
}

impl LimiterScope {
    pub fn as_str(self) -> &'static str {
        match self {
            LimiterScope::General => "general",
            LimiterScope::Login => "login",
        }
    }
}

/// Bucket state after a request was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub limit: u32,
    pub remaining: u32,
    /// The key bypassed limiting; no bucket was consulted.
    pub whitelisted: bool,
}

struct Bucket {
    limiter: BucketLimiter,
    last_seen: Instant,
}

/// Build the quota for `per_minute` requests.
fn quota_for(per_minute: u32) -> Quota {
    let capacity = NonZeroU32::new(per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
    // Refill max(N/60, 1) tokens per second
    let period = (Duration::from_secs(60) / capacity.get()).min(Duration::from_secs(1));

    match Quota::with_period(period) {
        Some(quota) => quota.allow_burst(capacity),
        None => Quota::per_second(NonZeroU32::MIN).allow_burst(capacity),
    }
}

/// Lazily populated map of client key → token bucket.
///
/// Lookup, creation, accounting and `last_seen` updates happen inside one
/// short critical section on a single mutex.
pub struct RateLimiterRegistry {
    scope: LimiterScope,
    quota: Quota,
    limit: u32,
    retry_after_secs: u64,
    whitelist: Arc<dyn WhitelistPolicy>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl std::fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("scope", &self.scope)
            .field("limit", &self.limit)
            .field("retry_after_secs", &self.retry_after_secs)
            .field("buckets", &self.bucket_count())
            .finish()
    }
}

impl RateLimiterRegistry {
    /// Create a registry allowing `per_minute` requests per key.
    ///
    /// A budget of 0 is treated as 1.
    pub fn new(
        scope: LimiterScope,
        per_minute: u32,
        retry_after_secs: u64,
        whitelist: Arc<dyn WhitelistPolicy>,
    ) -> Self {
        Self {
            scope,
            quota: quota_for(per_minute),
            limit: per_minute.max(1),
            retry_after_secs,
            whitelist,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> LimiterScope {
        self.scope
    }

    /// Configured per-minute budget.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }

    pub fn is_whitelisted(&self, key: &str) -> bool {
        self.whitelist.is_whitelisted(key)
    }

    /// Count one request against `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RateLimited` when the bucket is empty.
    pub fn check(&self, key: &str) -> AppResult<RateSnapshot> {
        if self.is_whitelisted(key) {
            return Ok(RateSnapshot {
                limit: self.limit,
                remaining: self.limit,
                whitelisted: true,
            });
        }

        let (outcome, created, count) = {
            let mut buckets = self.buckets.lock();
            let before = buckets.len();
            let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
                limiter: RateLimiter::direct(self.quota).with_middleware::<StateInformationMiddleware>(),
                last_seen: Instant::now(),
            });
            bucket.last_seen = Instant::now();
            let outcome = bucket.limiter.check();
            (outcome, buckets.len() > before, buckets.len())
        };

        if created {
            metrics::set_rate_limit_buckets(self.scope.as_str(), count);
        }

        match outcome {
            Ok(snapshot) => Ok(RateSnapshot {
                limit: self.limit,
                remaining: snapshot.remaining_burst_capacity(),
                whitelisted: false,
            }),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                debug!(
                    scope = self.scope.as_str(),
                    key = %key,
                    next_token_ms = wait.as_millis() as u64,
                    "Bucket empty"
                );
                metrics::record_rate_limited(self.scope.as_str());
                Err(AppError::RateLimited {
                    retry_after_secs: self.retry_after_secs,
                })
            }
        }
    }

    /// Like [`check`](Self::check), reduced to a yes/no answer.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_ok()
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Evict buckets untouched for longer than `max_idle`. Returns how many were removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let (removed, remaining) = {
            let mut buckets = self.buckets.lock();
            let before = buckets.len();
            buckets.retain(|_, bucket| bucket.last_seen.elapsed() < max_idle);
            (before - buckets.len(), buckets.len())
        };

        if removed > 0 {
            debug!(scope = self.scope.as_str(), removed, remaining, "Swept idle rate-limit buckets");
        }
        metrics::set_rate_limit_buckets(self.scope.as_str(), remaining);
        removed
    }
}

// =============================================================================
// Whitelist
// =============================================================================

/// IP/CIDR whitelist read from `RATE_LIMIT_WHITELIST`.
///
/// With `allow_loopback` set (development environment) every loopback
/// address is whitelisted as well. Keys that are not IP addresses, such as
/// the shared unknown-client key, never match.
#[derive(Debug, Clone, Default)]
pub struct ConfigWhitelist {
    ranges: Vec<CidrRange>,
    allow_loopback: bool,
}

impl ConfigWhitelist {
    pub fn new(entries: &[String], allow_loopback: bool) -> Self {
        Self {
            ranges: parse_cidr_list(entries, "RATE_LIMIT_WHITELIST"),
            allow_loopback,
        }
    }
}

impl WhitelistPolicy for ConfigWhitelist {
    fn is_whitelisted(&self, key: &str) -> bool {
        let Ok(ip) = key.parse::<IpAddr>() else {
            return false;
        };
        (self.allow_loopback && ip.is_loopback()) || self.ranges.iter().any(|range| range.contains(&ip))
    }
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Rate limiting layer keyed by client IP.
///
/// # Example
///
/// ```rust,ignore
/// let registry = Arc::new(RateLimiterRegistry::new(LimiterScope::General, 100, 60, whitelist));
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(registry, trusted_proxies));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    registry: Arc<RateLimiterRegistry>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    skip_paths: Arc<Vec<String>>,
    status: StatusCode,
}

impl RateLimitLayer {
    pub fn new(registry: Arc<RateLimiterRegistry>, trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        Self {
            registry,
            trusted_proxies,
            skip_paths: Arc::new(Vec::new()),
            status: StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Paths this layer lets through uncounted (exact match).
    pub fn with_skip_paths(mut self, paths: Vec<String>) -> Self {
        self.skip_paths = Arc::new(paths);
        self
    }

    /// Status code used for rejections.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            registry: self.registry.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            skip_paths: self.skip_paths.clone(),
            status: self.status,
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    registry: Arc<RateLimiterRegistry>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    skip_paths: Arc<Vec<String>>,
    status: StatusCode,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        let registry = self.registry.clone();
        let status = self.status;
        let mut inner = self.inner.clone();

        if self.skip_paths.iter().any(|p| p == req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let client_ip = client_ip(&req, &self.trusted_proxies);

        Box::pin(async move {
            match registry.check(&client_ip) {
                Ok(snapshot) => {
                    let mut response = inner.call(req).await?;
                    if !snapshot.whitelisted {
                        let headers = response.headers_mut();
                        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(snapshot.limit));
                        headers.insert(
                            RATE_LIMIT_REMAINING_HEADER,
                            HeaderValue::from(snapshot.remaining),
                        );
                    }
                    Ok(response)
                }
                Err(err) => {
                    warn!(
                        client_ip = %client_ip,
                        path = %req.uri().path(),
                        scope = registry.scope().as_str(),
                        retry_after_secs = registry.retry_after_secs(),
                        "Rate limit exceeded"
                    );

                    let mut response = err.into_response();
                    *response.status_mut() = status;
                    let headers = response.headers_mut();
                    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(registry.limit()));
                    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from_static("0"));
                    Ok(response)
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::http::header::RETRY_AFTER;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn registry(scope: LimiterScope, per_minute: u32) -> RateLimiterRegistry {
        RateLimiterRegistry::new(scope, per_minute, 60, Arc::new(ConfigWhitelist::default()))
    }

    #[test]
    fn test_burst_of_n_plus_one_rejects_exactly_once() {
        let registry = registry(LimiterScope::General, 5);

        let rejected = (0..6).filter(|_| !registry.allow("10.0.0.1")).count();
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_remaining_counts_down() {
        let registry = registry(LimiterScope::General, 3);

        assert_eq!(registry.check("k").unwrap().remaining, 2);
        assert_eq!(registry.check("k").unwrap().remaining, 1);
        assert_eq!(registry.check("k").unwrap().remaining, 0);

        match registry.check("k") {
            Err(AppError::RateLimited { retry_after_secs }) => assert_eq!(retry_after_secs, 60),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let registry = registry(LimiterScope::Login, 1);

        assert!(registry.allow("a"));
        assert!(!registry.allow("a"));
        assert!(registry.allow("b"));
        assert_eq!(registry.bucket_count(), 2);
    }

    #[test]
    fn test_scopes_are_separate_namespaces() {
        let general = registry(LimiterScope::General, 1);
        let login = registry(LimiterScope::Login, 1);

        assert!(login.allow("10.0.0.1"));
        assert!(!login.allow("10.0.0.1"));
        assert!(general.allow("10.0.0.1"));
    }

    #[test]
    fn test_zero_budget_behaves_as_one() {
        let registry = registry(LimiterScope::General, 0);
        assert_eq!(registry.limit(), 1);
        assert!(registry.allow("k"));
        assert!(!registry.allow("k"));
    }

    #[test]
    fn test_whitelisted_never_rejected_and_no_bucket() {
        let whitelist = ConfigWhitelist::new(&["192.168.0.0/16".to_string()], false);
        let registry = RateLimiterRegistry::new(LimiterScope::General, 1, 60, Arc::new(whitelist));

        for _ in 0..50 {
            let snapshot = registry.check("192.168.5.5").unwrap();
            assert!(snapshot.whitelisted);
        }
        assert_eq!(registry.bucket_count(), 0);
    }

    #[test]
    fn test_config_whitelist() {
        let plain = ConfigWhitelist::new(&["10.1.2.3".to_string(), "junk".to_string()], false);
        assert!(plain.is_whitelisted("10.1.2.3"));
        assert!(!plain.is_whitelisted("10.1.2.4"));
        assert!(!plain.is_whitelisted("127.0.0.1"));
        assert!(!plain.is_whitelisted(super::super::ip::UNKNOWN_IP));

        let development = ConfigWhitelist::new(&[], true);
        assert!(development.is_whitelisted("127.0.0.1"));
        assert!(development.is_whitelisted("::1"));
        assert!(!development.is_whitelisted("8.8.8.8"));
    }

    #[test]
    fn test_sweep_idle() {
        let registry = registry(LimiterScope::General, 10);
        registry.allow("a");
        registry.allow("b");

        assert_eq!(registry.sweep_idle(Duration::from_secs(3600)), 0);
        assert_eq!(registry.bucket_count(), 2);

        assert_eq!(registry.sweep_idle(Duration::ZERO), 2);
        assert_eq!(registry.bucket_count(), 0);
    }

    #[test]
    fn test_quota_capacity() {
        assert_eq!(quota_for(100).burst_size().get(), 100);
        assert_eq!(quota_for(0).burst_size().get(), 1);
        assert!(quota_for(5).replenish_interval() <= Duration::from_secs(1));
        assert_eq!(quota_for(600).replenish_interval(), Duration::from_millis(100));
    }

    // ==========================================================================
    // Layer
    // ==========================================================================

    fn router(layer: RateLimitLayer, hits: Arc<AtomicUsize>) -> Router {
        let counter = move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "ok"
            }
        };
        Router::new()
            .route("/api/items", get(counter.clone()))
            .route("/api/auth/login", get(counter))
            .layer(layer)
    }

    fn request(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_layer_rejects_without_calling_handler() {
        let registry = Arc::new(registry(LimiterScope::General, 2));
        let layer = RateLimitLayer::new(registry, Arc::new(TrustedProxyConfig::default()))
            .with_status(StatusCode::SERVICE_UNAVAILABLE);
        let hits = Arc::new(AtomicUsize::new(0));
        let app = router(layer, hits.clone());

        for expected_remaining in ["1", "0"] {
            let response = app.clone().oneshot(request("/api/items")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[RATE_LIMIT_LIMIT_HEADER], "2");
            assert_eq!(response.headers()[RATE_LIMIT_REMAINING_HEADER], expected_remaining);
        }

        let response = app.oneshot(request("/api/items")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[RETRY_AFTER], "60");
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING_HEADER], "0");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["retry_after"], 60);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_layer_skip_paths_are_uncounted() {
        let registry = Arc::new(registry(LimiterScope::General, 1));
        let layer = RateLimitLayer::new(registry.clone(), Arc::new(TrustedProxyConfig::default()))
            .with_skip_paths(vec!["/api/auth/login".to_string()]);
        let app = router(layer, Arc::new(AtomicUsize::new(0)));

        for _ in 0..5 {
            let response = app.clone().oneshot(request("/api/auth/login")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(RATE_LIMIT_LIMIT_HEADER).is_none());
        }
        assert_eq!(registry.bucket_count(), 0);
    }
}
