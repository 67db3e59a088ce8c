//! Replybot web server - signed webhook receiver.
//!
//! This binary:
//! - Receives signed webhooks and verifies them
//! - Acknowledges immediately and replies in the background
//! - On SIGINT/SIGTERM stops accepting connections, then drains
//!   in-flight replies
//!
//! A drain that times out makes the process exit non-zero.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use replybot::web::run_server;
use replybot::{config, router, AppState, Config, HttpCallbackClient, Replier, TaskSupervisor, Verifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config::log_level()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        address = %config.bind_addr(),
        signing_configured = config.signing_secret.is_some(),
        replay_window_secs = config.replay_window_secs,
        think_steps = config.think_steps,
        think_interval_ms = config.think_interval_ms,
        drain_timeout_secs = config.drain_timeout_secs,
        "config_loaded"
    );

    let secret = config
        .signing_secret
        .as_deref()
        .context("SIGNING_SECRET must be set")?;
    let verifier = Verifier::new(secret)
        .context("Invalid signing secret")?
        .with_replay_window(config.replay_window_secs);

    let client = HttpCallbackClient::new(config.callback_timeout())?;
    let replier = Replier::new(Arc::new(client), config.think_time());
    let supervisor = TaskSupervisor::new();

    let state = AppState::new(verifier, supervisor.clone(), replier);
    let app = router(state);

    // Bind to address
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown, then drain in-flight replies
    run_server(
        listener,
        app,
        &supervisor,
        shutdown_signal(),
        config.drain_timeout(),
    )
    .await?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
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
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
