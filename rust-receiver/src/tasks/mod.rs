//! Deferred work and its supervision.
//!
//! - `supervisor`: tracks spawned tasks, cancellation and drain
//! - `reply`: the job run for each accepted webhook

pub mod reply;
pub mod supervisor;

pub use reply::{MessageTransform, Replier, ReplyJob, Reverse, ThinkTime};
pub use supervisor::{CancelSignal, TaskHandle, TaskId, TaskState, TaskSupervisor};
