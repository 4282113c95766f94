// State Loader - Web Server
// Serves GET / (run a load), /api/health and /api/rows

use anyhow::{Context, Result};
use state_loader::config::{load_dotenv, PORT};
use state_loader::logging::init_tracing;
use state_loader::server::{router, AppState};
use state_loader::LoaderConfig;

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    init_tracing("info,tower_http=debug");

    // The listening port is needed up front; the rest is resolved per request
    let port: u16 = std::env::var(PORT)
        .with_context(|| format!("{} must be set", PORT))?
        .parse()
        .with_context(|| format!("{} must be a port number", PORT))?;

    match LoaderConfig::from_env() {
        Ok(config) => tracing::info!(
            service = %config.service_name,
            source = %config.source,
            destination = %config.destination,
            "configuration resolved"
        ),
        Err(e) => tracing::warn!(error = %e, "configuration incomplete; loads will fail"),
    }

    let app = router(AppState::from_env());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(%addr, "server listening");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
