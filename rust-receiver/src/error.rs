//! Error types for the three phases of a webhook's life.
//!
//! - [`VerifyError`]: request-time signature checks, all mapped to 401
//! - [`TaskError`]: deferred work, terminal for one task only
//! - [`DrainError`]: shutdown, surfaced to the operator

use thiserror::Error;

/// Why an inbound webhook failed verification.
///
/// The caller only ever sees `401 Unauthorized`; the variant is for logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// A required header is absent or not valid ASCII.
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// The timestamp header is not an integer.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// The timestamp is outside the replay window, in either direction.
    #[error("request outside replay window ({age_secs}s)")]
    StaleRequest { age_secs: u64 },

    /// The provided signature does not match the computed one.
    #[error("signature mismatch")]
    SignatureMismatch,
}

impl VerifyError {
    /// Stable label used as the `reason` field in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::MissingHeader(_) => "missing_header",
            VerifyError::InvalidTimestamp => "invalid_timestamp",
            VerifyError::StaleRequest { .. } => "stale_request",
            VerifyError::SignatureMismatch => "signature_mismatch",
        }
    }
}

/// Failure of a deferred reply task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The form payload lacked a field the reply needs.
    #[error("missing form field: {0}")]
    MissingField(&'static str),

    /// The message transform rejected its input.
    #[error("transform failed: {0}")]
    Transform(String),

    /// The reply could not be delivered to the callback URL.
    #[error("callback delivery failed: {0}")]
    CallbackDelivery(String),

    /// The supervisor signalled cancellation before the outbound call.
    #[error("cancelled")]
    Cancelled,
}

/// Shutdown could not drain all tracked tasks in time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrainError {
    #[error("drain timed out with {remaining} task(s) still running")]
    Timeout { remaining: usize },
}
