//! Main Entrypoint for the Survey Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the scenario table and resolving its credentials.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use survey_core::{
    llm_client::HttpUpstreamClient, retry::TokioSleeper, scenario::ScenarioTable,
};
use survey_relay::{config::Config, router::create_router, state::AppState};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Loading scenario table...");

    // --- 3. Load Scenarios ---
    let scenarios = ScenarioTable::load(&config.scenarios_path, |name| std::env::var(name).ok())
        .with_context(|| {
            format!(
                "Failed to load scenarios from {}",
                config.scenarios_path.display()
            )
        })?;
    info!(count = scenarios.len(), "Scenario table loaded.");

    // --- 4. Initialize Shared Services ---
    let upstream = HttpUpstreamClient::new(config.upstream_timeout)?;
    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        scenarios: Arc::new(scenarios),
        upstream: Arc::new(upstream),
        sleeper: Arc::new(TokioSleeper),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        upstream = %config.upstream_base_url,
        max_attempts = config.retry_max_attempts,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
