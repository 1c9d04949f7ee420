//! Main Entrypoint for the Voice Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the Langflow client shared by every call.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use voice_relay_api::{config::Config, router::create_router, state::AppState};
use voice_relay_core::LangflowClient;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
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
    info!("Configuration loaded. Initializing application state...");
    if let Some(warning) = config.langflow.base_url_warning() {
        warn!("{}", warning);
    }

    // --- 3. Initialize Shared Services ---
    let chat_flow =
        Arc::new(LangflowClient::new(&config.langflow).context("Failed to create Langflow client")?);

    info!(
        relay_url = %config.relay_url(),
        langflow_url = %config.langflow.run_url(),
        timeout = ?config.langflow.timeout,
        streaming = config.langflow_streaming,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let bind_address = config.bind_address;
    let app_state = Arc::new(AppState {
        config: Arc::new(config),
        chat_flow,
    });

    // --- 4. Create Router and Apply Middleware ---
    let app = create_router(app_state).layer(TraceLayer::new_for_http());

    // --- 5. Start Server ---
    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%bind_address, error = %e, "Failed to bind listener");
            return Err(e).context("Failed to start HTTP/WebSocket listener");
        }
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
