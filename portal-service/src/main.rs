//! Captive portal service entry point.

use portal_service::config::PortalConfig;
use portal_service::services::init_metrics;
use portal_service::startup::Application;
use service_core::error::AppError;
use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on invalid configuration
    let config = PortalConfig::load()?;

    init_tracing(
        &config.server.service_name,
        &config.server.log_level,
        config.server.json_logs,
    );
    init_metrics();

    tracing::info!(
        service = %config.server.service_name,
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.common.port,
        router = %config.router.base_url,
        billing = %config.billing.base_url,
        database = config.database.is_some(),
        radius = config.radius.is_some(),
        social_providers = config.social.providers.len(),
        voucher_enabled = config.features.voucher_enabled,
        social_login_enabled = config.features.social_login_enabled,
        "Starting captive portal service"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        e
    })?;

    app.run_until_stopped(shutdown_signal()).await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}
