//! HTTP middleware guarding the portal.
//!
//! - **CORS**: origin classification with a private-network heuristic and
//!   preflight short-circuit
//! - **Rate Limiting**: per-IP GCRA buckets in separate general and login
//!   namespaces
//! - **Authentication**: bearer → cookie token → legacy session resolution in
//!   standard and strict modes
//! - **Security Headers**: hardening headers added by strict mode
//! - **Client IP**: forwarding-header resolution gated by trusted proxies
//!
//! # Architecture
//!
//! ```text
//! Request → CORS → Rate Limiter → [Login Limiter | Auth] → Handler → Response
//!            ↓          ↓                ↓            ↓
//!        403 / 204     429              429      401 JSON / 302
//! ```

pub mod auth;
pub mod cors;
pub mod ip;
pub mod origin;
pub mod rate_limit;
pub mod security_headers;

pub use auth::{AuthLayer, AuthSettings, is_api_request};
pub use cors::CorsLayer;
pub use ip::{TrustedProxyConfig, UNKNOWN_IP, client_ip, resolve_client_ip};
pub use origin::{OriginDecision, OriginPolicy, classify, is_private_host};
pub use rate_limit::{
    ConfigWhitelist, LimiterScope, RateLimitLayer, RateLimiterRegistry, RateSnapshot,
};
pub use security_headers::apply_security_headers;
