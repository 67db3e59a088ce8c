//! Replybot - signed webhook receiver with supervised deferred replies.
//!
//! ## Architecture
//!
//! ```text
//! POST /webhook → Verifier → 200 OK
//!                    │
//!                    └→ TaskSupervisor::spawn → Replier → POST response_url
//! ```
//!
//! Every reply task is tracked from spawn to its terminal state, so shutdown
//! can cancel and drain in-flight work without losing track of any of it.

pub mod callback;
pub mod config;
pub mod error;
pub mod tasks;
pub mod web;

// Re-export commonly used types
pub use callback::{CallbackClient, HttpCallbackClient, ReplyBody};
pub use config::Config;
pub use error::{DrainError, TaskError, VerifyError};
pub use tasks::{Replier, ReplyJob, TaskSupervisor, ThinkTime};
pub use web::{router, AppState, Verifier};
