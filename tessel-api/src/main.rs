//! Tessel API Server Entry Point
//!
//! Loads configuration, installs telemetry, connects the backends and
//! serves the Axum router until Ctrl-C.

use tessel_api::telemetry::init_tracer;
use tessel_api::{create_api_router, ApiError, ApiResult, AppConfig, ServiceContext};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = AppConfig::load()?;
    let telemetry = init_tracer(&config.tracing)?;

    let addr = config.app.bind_addr()?;
    let service = ServiceContext::connect(config, telemetry).await?;
    let app = create_api_router(service.state(), &service.config().app);

    tracing::info!(%addr, "Starting Tessel API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)));

    service.shutdown().await;
    served
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
}
