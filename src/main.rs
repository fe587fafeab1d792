use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use portal_guard::config::LogFormat;
use portal_guard::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration decides the log format, so load it before logging starts
    let config = Config::from_env();

    let (level, format) = match &config {
        Ok(config) => (config.log_level.clone(), config.log_format),
        Err(_) => ("info".to_string(), LogFormat::Pretty),
    };
    init_tracing(&level, format);

    info!(
        "Starting Portal Guard v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        environment = %config.environment,
        rate_limit_per_minute = config.rate_limit_per_minute,
        login_rate_limit_per_minute = config.login_rate_limit_per_minute,
        "Configuration loaded"
    );

    // Metrics exporter (optional)
    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    } else {
        info!("Metrics export disabled (METRICS_PORT=0)");
    }

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    // Build application state and router
    let state = AppState::from_config(config).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health          - Health check");
    info!("  GET  /ready           - Readiness check");
    info!("  POST /api/auth/login  - Exchange a token for the auth cookie");
    info!("  GET  /api/me          - Current identity (standard auth)");
    info!("  GET  /dashboard       - Browser page (standard auth)");
    info!("  GET  /api/secure/me   - Current identity (strict auth)");

    // Peer addresses feed client IP resolution
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Flush audit writes and stop the bucket sweep
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
