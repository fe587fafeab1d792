//! Prometheus metrics for the request guards.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `guard_auth_failures_total` - Rejected credentials (label: reason)
//! - `guard_auth_success_total` - Accepted credentials (label: source)
//! - `guard_rate_limited_total` - Requests rejected by a limiter (label: scope)
//! - `guard_cors_denied_total` - Requests rejected for their origin
//! - `guard_audit_records_total` - Audit records handed to the store (label: status)
//! - `guard_audit_persist_failures_total` - Audit records the store failed to persist
//!
//! ## Histograms
//! - `guard_validation_duration_seconds` - Collaborator call latency (label: source)
//!
//! ## Gauges
//! - `guard_rate_limit_buckets` - Live buckets per limiter (label: scope)
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so tests and library users can call them freely.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const AUTH_FAILURES_TOTAL: &str = "guard_auth_failures_total";
    pub const AUTH_SUCCESS_TOTAL: &str = "guard_auth_success_total";
    pub const RATE_LIMITED_TOTAL: &str = "guard_rate_limited_total";
    pub const RATE_LIMIT_BUCKETS: &str = "guard_rate_limit_buckets";
    pub const CORS_DENIED_TOTAL: &str = "guard_cors_denied_total";
    pub const AUDIT_RECORDS_TOTAL: &str = "guard_audit_records_total";
    pub const AUDIT_PERSIST_FAILURES_TOTAL: &str = "guard_audit_persist_failures_total";
    pub const VALIDATION_DURATION_SECONDS: &str = "guard_validation_duration_seconds";
}

/// Initialize the Prometheus metrics exporter.
///
/// Installs the global recorder, starts the HTTP listener on `metrics_addr`
/// and registers metric descriptions.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of requests rejected for missing or invalid credentials"
    );
    describe_counter!(
        names::AUTH_SUCCESS_TOTAL,
        "Total number of requests whose credentials resolved to an identity"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by a rate limiter"
    );
    describe_counter!(
        names::CORS_DENIED_TOTAL,
        "Total number of requests rejected because of their Origin"
    );
    describe_counter!(
        names::AUDIT_RECORDS_TOTAL,
        "Total number of activity records submitted for persistence"
    );
    describe_counter!(
        names::AUDIT_PERSIST_FAILURES_TOTAL,
        "Total number of activity records the audit store failed to persist"
    );

    describe_histogram!(
        names::VALIDATION_DURATION_SECONDS,
        "Token/session validator call duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_BUCKETS,
        "Number of live rate-limit buckets"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a credential rejection; `reason` is an `AppError::kind()` label.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Record a successful credential resolution.
pub fn record_auth_success(source: &'static str) {
    counter!(names::AUTH_SUCCESS_TOTAL, "source" => source).increment(1);
}

/// Record a rate-limit rejection.
pub fn record_rate_limited(scope: &'static str) {
    counter!(names::RATE_LIMITED_TOTAL, "scope" => scope).increment(1);
}

/// Record a CORS rejection.
pub fn record_cors_denied() {
    counter!(names::CORS_DENIED_TOTAL).increment(1);
}

/// Record an activity record submitted to the store.
pub fn record_audit_record(status: &'static str) {
    counter!(names::AUDIT_RECORDS_TOTAL, "status" => status).increment(1);
}

/// Record a failed audit write.
pub fn record_audit_persist_failure() {
    counter!(names::AUDIT_PERSIST_FAILURES_TOTAL).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record how long a token or session validator call took.
pub fn record_validation_duration(source: &'static str, duration_secs: f64) {
    histogram!(names::VALIDATION_DURATION_SECONDS, "source" => source).record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the live bucket gauge for a limiter scope.
pub fn set_rate_limit_buckets(scope: &'static str, count: usize) {
    // Precision loss only past 2^53 buckets
    #[allow(clippy::cast_precision_loss)]
    gauge!(names::RATE_LIMIT_BUCKETS, "scope" => scope).set(count as f64);
}
