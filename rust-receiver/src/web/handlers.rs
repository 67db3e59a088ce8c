//! Endpoint handlers.
//!
//! The webhook handler is designed to be fast - it only:
//! 1. Verifies the signature
//! 2. Registers the reply task with the supervisor
//! 3. Returns immediately
//!
//! The reply itself runs in the background.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::tasks::{Replier, ReplyJob, TaskSupervisor};
use crate::web::signature::{unix_now, unix_now_f64, Verifier};

/// Dispatcher state, built once at startup and shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<Verifier>,
    pub supervisor: TaskSupervisor,
    pub replier: Arc<Replier>,
}

impl AppState {
    pub fn new(verifier: Verifier, supervisor: TaskSupervisor, replier: Replier) -> Self {
        Self {
            verifier: Arc::new(verifier),
            supervisor,
            replier: Arc::new(replier),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub success: bool,
    /// Seconds since the Unix epoch, with fractional part
    pub timestamp: f64,
}

/// Health check endpoint.
pub async fn healthz() -> Json<HealthResponse> {
    info!("health_check");
    Json(HealthResponse {
        success: true,
        timestamp: unix_now_f64(),
    })
}

// =============================================================================
// Webhook
// =============================================================================

/// Signed webhook endpoint.
///
/// Responds `401` with an empty body on any verification failure; the reason
/// is only logged. On success the reply task is registered before the empty
/// `200` is returned, and the handler never waits for it.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    info!(body_length = body.len(), "webhook_received");

    if let Err(e) = state.verifier.verify(&headers, &body, unix_now()) {
        warn!(reason = e.kind(), error = %e, "webhook_verification_failed");
        return StatusCode::UNAUTHORIZED;
    }

    let job = ReplyJob::from_form(&body);
    let replier = Arc::clone(&state.replier);
    let handle = state
        .supervisor
        .spawn("reply", move |cancel| async move { replier.run(job, cancel).await });

    info!(
        task_id = %handle.id(),
        in_flight = state.supervisor.len(),
        "webhook_accepted"
    );

    StatusCode::OK
}
