//! Web server module for handling inbound webhooks.
//!
//! This module provides a thin, fast web server that:
//! - Answers health checks
//! - Verifies signed webhooks
//! - Hands accepted webhooks to the task supervisor
//! - Returns 200 OK before any deferred work runs

pub mod handlers;
pub mod signature;

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::tasks::TaskSupervisor;

pub use handlers::{healthz, webhook, AppState, HealthResponse};
pub use signature::{unix_now, unix_now_f64, InvalidSecret, Verifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Build the router for the webhook receiver.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook", post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` until `shutdown` resolves, then drain the supervisor.
///
/// The drain runs even when the server exits with an error; a server error
/// takes precedence over a drain timeout in the returned result.
pub async fn run_server<S>(
    listener: TcpListener,
    app: Router,
    supervisor: &TaskSupervisor,
    shutdown: S,
    drain_timeout: Duration,
) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Err(e) = &served {
        error!(error = %e, "web_server_error");
    }

    // No new tasks can arrive now; cancel and wait for the rest
    let drained = supervisor.drain(drain_timeout).await;
    info!(in_flight = supervisor.len(), "web_server_stopped");

    served.context("Server error")?;
    drained.context("Failed to drain background tasks")?;
    Ok(())
}
