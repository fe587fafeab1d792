//! Shared application state for Axum handlers and middleware.
//!
//! Holds the configured guards (credential validator, rate-limiter
//! registries, origin policy) and the audit sink. Everything is behind `Arc`
//! so cloning per request is cheap.
//!
//! # Structured Concurrency
//!
//! Background work (idle-bucket sweeping and audit writes) is tracked by a
//! `tokio_util::task::TaskTracker` and stopped through a `CancellationToken`.
//! Call `shutdown()` before exit so pending audit records are flushed.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::FromRef;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::audit::{AuditSink, AuditStore, TracingAuditStore};
use crate::auth::{
    CredentialValidator, InMemorySessionStore, SessionValidator, StaticTokenValidator,
    TokenValidator,
};
use crate::config::Config;
use crate::error::AppResult;
use crate::middleware::auth::AuthSettings;
use crate::middleware::ip::TrustedProxyConfig;
use crate::middleware::origin::OriginPolicy;
use crate::middleware::rate_limit::{ConfigWhitelist, LimiterScope, RateLimiterRegistry};

/// Shared application state.
///
/// # Lifecycle
///
/// The idle-bucket sweep task is spawned when the state is created, so
/// construction must happen inside a Tokio runtime:
///
/// ```rust,ignore
/// let state = AppState::from_config(config)?;
/// // ... serve ...
/// state.shutdown().await;  // Flush audit writes, stop the sweep
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Token → cookie → session credential resolution
    pub credentials: Arc<CredentialValidator>,
    /// Budget for general traffic
    pub general_limiter: Arc<RateLimiterRegistry>,
    /// Budget for login attempts
    pub login_limiter: Arc<RateLimiterRegistry>,
    /// Static CORS trust configuration
    pub origin_policy: Arc<OriginPolicy>,
    /// Proxies allowed to set forwarding headers
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Failure-shape settings for the auth layers
    pub auth_settings: Arc<AuthSettings>,
    /// Where activity records go
    pub audit: AuditSink,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl FromRef<AppState> for AuditSink {
    fn from_ref(state: &AppState) -> Self {
        state.audit.clone()
    }
}

impl AppState {
    /// Create state with explicit collaborators.
    ///
    /// Without a session validator the legacy session cookie is ignored.
    pub fn new(
        config: Config,
        tokens: Arc<dyn TokenValidator>,
        sessions: Option<Arc<dyn SessionValidator>>,
        audit_store: Arc<dyn AuditStore>,
    ) -> Self {
        let config = Arc::new(config);
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let trusted_proxies = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));
        let whitelist = Arc::new(ConfigWhitelist::new(
            &config.rate_limit_whitelist,
            config.is_development(),
        ));

        let general_limiter = Arc::new(RateLimiterRegistry::new(
            LimiterScope::General,
            config.rate_limit_per_minute,
            config.rate_limit_retry_after_secs,
            whitelist.clone(),
        ));
        let login_limiter = Arc::new(RateLimiterRegistry::new(
            LimiterScope::Login,
            config.login_rate_limit_per_minute,
            config.rate_limit_retry_after_secs,
            whitelist,
        ));

        let state = Self {
            credentials: Arc::new(CredentialValidator::new(
                tokens,
                sessions,
                config.cookies.clone(),
            )),
            general_limiter,
            login_limiter,
            origin_policy: Arc::new(OriginPolicy::new(config.cors_allowed_origins.clone())),
            auth_settings: Arc::new(AuthSettings::from_config(&config)),
            audit: AuditSink::new(audit_store, task_tracker.clone(), trusted_proxies.clone()),
            trusted_proxies,
            config,
            started_at: Instant::now(),
            task_tracker,
            cancellation_token,
        };

        state.spawn_bucket_sweep_task();

        state
    }

    /// Create state from configuration with the bundled collaborators:
    /// static tokens from `AUTH_STATIC_TOKENS`, an empty in-memory session
    /// store, and the tracing audit store.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a static token entry is malformed.
    pub fn from_config(config: Config) -> AppResult<Self> {
        let tokens = StaticTokenValidator::from_specs(&config.static_tokens)?;
        info!(count = tokens.len(), "Loaded static tokens");

        Ok(Self::new(
            config,
            Arc::new(tokens),
            Some(Arc::new(InMemorySessionStore::new())),
            Arc::new(TracingAuditStore),
        ))
    }

    /// Spawn the idle-bucket sweep.
    ///
    /// Evicts buckets from both registries that have been unused for longer
    /// than `rate_limit_idle_ttl`, every `rate_limit_sweep_interval`.
    fn spawn_bucket_sweep_task(&self) {
        let general = self.general_limiter.clone();
        let login = self.login_limiter.clone();
        let period = self.config.rate_limit_sweep_interval;
        let idle_ttl = self.config.rate_limit_idle_ttl;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Bucket sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = general.sweep_idle(idle_ttl) + login.sweep_idle(idle_ttl);
                        debug!(
                            removed,
                            general = general.bucket_count(),
                            login = login.bucket_count(),
                            "Bucket sweep finished"
                        );
                    }
                }
            }

            debug!("Bucket sweep task shutting down");
        });
    }

    /// False once shutdown has started.
    pub fn is_ready(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// 1. Signals the sweep task to stop
    /// 2. Closes the task tracker
    /// 3. Waits for the sweep and every pending audit write
    pub async fn shutdown(&self) {
        info!(
            pending = self.task_tracker.len(),
            "Initiating graceful shutdown of background tasks"
        );

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::audit::{ActivityLogger, InMemoryAuditStore};
    use crate::auth::{Identity, Role};

    #[tokio::test]
    async fn test_from_config_defaults() {
        let state = AppState::from_config(Config::default()).unwrap();

        assert!(state.is_ready());
        assert_eq!(state.general_limiter.scope(), LimiterScope::General);
        assert_eq!(state.login_limiter.limit(), 5);

        state.shutdown().await;
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_audit_writes() {
        let store = Arc::new(InMemoryAuditStore::new());
        let state = AppState::new(
            Config::default(),
            Arc::new(StaticTokenValidator::new()),
            None,
            store.clone(),
        );

        let identity = Arc::new(Identity::new("1", "alice", Role::Admin));
        for _ in 0..3 {
            let _ = ActivityLogger::new(state.audit.clone(), Some(identity.clone()), "10.0.0.1", None, None)
                .record_success();
        }

        state.shutdown().await;
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_limiters_are_separate() {
        let state = AppState::from_config(Config::default()).unwrap();

        for _ in 0..5 {
            assert!(state.login_limiter.allow("198.51.100.1"));
        }
        assert!(!state.login_limiter.allow("198.51.100.1"));
        assert!(state.general_limiter.allow("198.51.100.1"));

        state.shutdown().await;
    }
}
