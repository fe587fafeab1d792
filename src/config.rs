//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//! Middleware never reads the environment itself: it receives the values it needs
//! from this struct at construction time.
//!
//! # Security Configuration
//!
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated override of the trusted origin list
//! - `AUTH_BYPASS_PATHS`: Paths served without authentication (default: `/health,/ready`)
//! - `TRUSTED_PROXIES`: CIDR ranges whose forwarding headers are trusted
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_PER_MINUTE`: General per-IP allowance (default: 100, 0 = disabled)
//! - `LOGIN_RATE_LIMIT_PER_MINUTE`: Login attempt allowance (default: 5)
//! - `RATE_LIMIT_WHITELIST`: IPs or CIDR ranges that are never limited

use std::env;
use std::time::Duration;

use axum::http::StatusCode;

use crate::error::{AppError, AppResult};

/// Environment label for development deployments.
pub const ENV_DEVELOPMENT: &str = "development";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Names of the cookies the credential validator reads and clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieNames {
    /// Access token cookie (resolution step 2)
    pub token: String,
    /// Refresh token cookie (cleared by strict mode on failure)
    pub refresh: String,
    /// Legacy session id cookie (resolution step 3)
    pub session: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            token: "auth_token".to_string(),
            refresh: "refresh_token".to_string(),
            session: "session_id".to_string(),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Deployment label, e.g. "development" or "production"
    pub environment: String,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Explicit origin allow-list. `None` means the loopback defaults apply.
    pub cors_allowed_origins: Option<Vec<String>>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// General requests per minute per client IP (0 = layer disabled)
    pub rate_limit_per_minute: u32,

    /// Login attempts per minute per client IP
    pub login_rate_limit_per_minute: u32,

    /// Value advertised in `Retry-After` on rejection
    pub rate_limit_retry_after_secs: u64,

    /// Status code returned on rejection (default: 429)
    pub rate_limit_status: StatusCode,

    /// IPs or CIDR ranges that bypass rate limiting entirely
    pub rate_limit_whitelist: Vec<String>,

    /// How often idle buckets are swept
    pub rate_limit_sweep_interval: Duration,

    /// Buckets unused for longer than this are evicted by the sweep
    pub rate_limit_idle_ttl: Duration,

    /// Paths governed by the login limiter instead of the general limiter
    pub login_paths: Vec<String>,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (trust all sources)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Paths that bypass authentication (for health checks, monitoring).
    /// Default: ["/health", "/ready"]
    pub auth_bypass_paths: Vec<String>,

    /// Browser navigations failing authentication are redirected here
    pub login_page_path: String,

    /// Requests under this prefix always get JSON errors
    pub api_path_prefix: String,

    /// Cookie names for token and session material
    pub cookies: CookieNames,

    /// Add the `Secure` attribute to cookies this service sets or clears
    pub secure_cookies: bool,

    /// Seed entries for the static token validator: `token=id:username:role`
    pub static_tokens: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any configuration value is invalid
    /// (e.g., non-numeric PORT value, unknown status code).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let status_code: u16 = Self::parse_env("RATE_LIMIT_STATUS", 429)?;

        let config = Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            environment: env::var("APP_ENV")
                .ok()
                .map(|e| e.trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .unwrap_or(defaults.environment),
            max_request_body_size: Self::parse_env(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .map(|raw| split_list(&raw, ',')),

            rate_limit_per_minute: Self::parse_env(
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            )?,
            login_rate_limit_per_minute: Self::parse_env(
                "LOGIN_RATE_LIMIT_PER_MINUTE",
                defaults.login_rate_limit_per_minute,
            )?,
            rate_limit_retry_after_secs: Self::parse_env(
                "RATE_LIMIT_RETRY_AFTER_SECS",
                defaults.rate_limit_retry_after_secs,
            )?,
            rate_limit_status: StatusCode::from_u16(status_code).map_err(|e| {
                AppError::ConfigError(format!("Invalid RATE_LIMIT_STATUS {status_code}: {e}"))
            })?,
            rate_limit_whitelist: Self::parse_list_env("RATE_LIMIT_WHITELIST", ""),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                300,
            )?),
            rate_limit_idle_ttl: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_IDLE_TTL_SECS",
                3600,
            )?),
            login_paths: Self::parse_list_env("LOGIN_PATHS", "/api/auth/login"),
            trusted_proxies: Self::parse_list_env("TRUSTED_PROXIES", ""),

            auth_bypass_paths: Self::parse_list_env("AUTH_BYPASS_PATHS", "/health,/ready")
                .into_iter()
                .filter(|p| p.starts_with('/'))
                .collect(),
            login_page_path: env::var("LOGIN_PAGE_PATH").unwrap_or(defaults.login_page_path),
            api_path_prefix: env::var("API_PATH_PREFIX").unwrap_or(defaults.api_path_prefix),
            cookies: CookieNames {
                token: env::var("TOKEN_COOKIE").unwrap_or(defaults.cookies.token),
                refresh: env::var("REFRESH_COOKIE").unwrap_or(defaults.cookies.refresh),
                session: env::var("SESSION_COOKIE").unwrap_or(defaults.cookies.session),
            },
            secure_cookies: Self::parse_env("SECURE_COOKIES", false)?,
            static_tokens: Self::parse_list_env("AUTH_STATIC_TOKENS", "")
                .into_iter()
                .flat_map(|entry| split_list(&entry, ';'))
                .collect(),

            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env::var("LOG_FORMAT")
                .ok()
                .map(|raw| raw.parse::<LogFormat>())
                .transpose()
                .map_err(|e| AppError::ConfigError(format!("Invalid LOG_FORMAT: {e}")))?
                .unwrap_or_default(),
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.rate_limit_status.is_client_error() || self.rate_limit_status.is_server_error())
        {
            return Err(AppError::ConfigError(format!(
                "RATE_LIMIT_STATUS must be a 4xx or 5xx code, got {}",
                self.rate_limit_status
            )));
        }

        if !self.login_page_path.starts_with('/') {
            return Err(AppError::ConfigError(
                "LOGIN_PAGE_PATH must start with '/'".to_string(),
            ));
        }

        if !self.api_path_prefix.starts_with('/') {
            return Err(AppError::ConfigError(
                "API_PATH_PREFIX must start with '/'".to_string(),
            ));
        }

        if self.rate_limit_idle_ttl.is_zero() || self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_IDLE_TTL_SECS and RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0"
                    .to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if the general rate limiter is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_per_minute > 0
    }

    /// Check if this is a development deployment.
    pub fn is_development(&self) -> bool {
        self.environment == ENV_DEVELOPMENT
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated environment variable, trimming and dropping empties.
    fn parse_list_env(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()), ',')
    }
}

/// Split `raw` on `sep`, trimming whitespace and dropping empty entries.
pub fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: ENV_DEVELOPMENT.to_string(),
            max_request_body_size: 1024 * 1024,
            cors_allowed_origins: None,
            rate_limit_per_minute: 100,
            login_rate_limit_per_minute: 5,
            rate_limit_retry_after_secs: 60,
            rate_limit_status: StatusCode::TOO_MANY_REQUESTS,
            rate_limit_whitelist: vec![],
            rate_limit_sweep_interval: Duration::from_secs(300),
            rate_limit_idle_ttl: Duration::from_secs(3600),
            login_paths: vec!["/api/auth/login".to_string()],
            trusted_proxies: vec![],
            auth_bypass_paths: vec!["/health".to_string(), "/ready".to_string()],
            login_page_path: "/login".to_string(),
            api_path_prefix: "/api/".to_string(),
            cookies: CookieNames::default(),
            secure_cookies: false,
            static_tokens: vec![],
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 3000);
        assert_eq!(config.rate_limit_per_minute, 100);
        assert_eq!(config.login_rate_limit_per_minute, 5);
        assert_eq!(config.rate_limit_retry_after_secs, 60);
        assert!(config.cors_allowed_origins.is_none());
        assert!(config.is_development());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8443,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8443");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_per_minute: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_validate_rejects_success_status_for_rate_limit() {
        let config = Config {
            rate_limit_status: StatusCode::OK,
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_STATUS"));
    }

    #[test]
    fn test_validate_login_page_path() {
        let config = Config {
            login_page_path: "login".to_string(),
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("LOGIN_PAGE_PATH"));
    }

    #[test]
    fn test_split_list_trims_and_drops_empties() {
        assert_eq!(
            split_list(" http://a.test , ,http://b.test,", ','),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
        assert!(split_list("", ',').is_empty());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_metrics_addr_disabled() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }
}
