//! task-relay server entry point.
//!
//! Starts the Axum HTTP server with the REST and WebSocket endpoints.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use task_relay::api;
use task_relay::app_state::AppState;
use task_relay::config::{LogFormat, RelayConfig};
use task_relay::service::Relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = RelayConfig::from_env()?;

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    tracing::info!(
        addr = %config.listen_addr,
        mailbox_capacity = config.relay.mailbox_capacity,
        disconnect_timeout_ms = config.relay.disconnect_timeout.as_millis(),
        "starting task-relay"
    );

    // Build relay and application state
    let relay = Arc::new(Relay::new(config.relay));
    let app_state = AppState {
        relay: Arc::clone(&relay),
    };

    // Build router
    let app = api::build_app(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(relay))
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C after closing every client connection, so upgraded
/// sockets do not hold the server open.
async fn shutdown_signal(relay: Arc<Relay>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
    relay.shutdown().await;
}
