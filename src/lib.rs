//! # Portal Guard
//!
//! Request guards for a web management portal, built as Axum/Tower layers:
//!
//! - **Authentication**: bearer token, token cookie, then legacy session,
//!   with JSON 401 for API clients and login redirects for browsers
//! - **Rate Limiting**: per-IP GCRA buckets with separate login budget,
//!   whitelist, and idle-bucket eviction
//! - **CORS**: explicit allow-list or loopback defaults, plus a
//!   private-network heuristic for LAN deployments
//! - **Auditing**: per-request activity records written off the request path
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → CORS → Rate Limit → Auth              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, account, login) + ActivityLogger         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Collaborators (TokenValidator, SessionValidator,           │
//! │                 WhitelistPolicy, AuditStore)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use portal_guard::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::from_config(config)?;
//!     let app = build_router(state.clone());
//!
//!     // Start the server...
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Seed API tokens and tighten the login budget:
//! ```bash
//! AUTH_STATIC_TOKENS="s3cret=1:alice:admin" LOGIN_RATE_LIMIT_PER_MINUTE=3 cargo run
//! ```

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use audit::{ActivityLogger, AuditStore, InMemoryAuditStore};
pub use auth::{CurrentIdentity, Identity, Role};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
