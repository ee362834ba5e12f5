use anyhow::Context;
use quote_simulation_service::{ServiceConfig, create_app, telemetry::init_tracing};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    init_tracing(config.log_format);

    info!(
        profile = ?config.profile,
        seed = ?config.seed,
        "Loaded simulation settings"
    );

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    let addr = listener.local_addr()?;
    let app = create_app(config);

    info!("Quote Simulation Service starting on {}", addr);
    info!("API Documentation available at http://{}/", addr);
    info!("Health check endpoint: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
