//! The deferred reply job.
//!
//! After a webhook is acknowledged, the reply job thinks for a while,
//! transforms the inbound message, and posts the result to the caller's
//! `response_url`. Cancellation is observed at every think step and once more
//! right before the outbound call; after that the call runs to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::callback::{CallbackClient, ReplyBody};
use crate::error::TaskError;
use crate::tasks::supervisor::CancelSignal;

/// Fields of the inbound form the reply needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyJob {
    pub text: Option<String>,
    pub response_url: Option<String>,
}

impl ReplyJob {
    /// Parse a form-encoded body. The first occurrence of a field wins.
    pub fn from_form(body: &[u8]) -> Self {
        let mut job = ReplyJob::default();
        for (key, value) in form_urlencoded::parse(body) {
            match key.as_ref() {
                "text" if job.text.is_none() => job.text = Some(value.into_owned()),
                "response_url" if job.response_url.is_none() => {
                    job.response_url = Some(value.into_owned())
                }
                _ => {}
            }
        }
        job
    }
}

/// Turns the inbound message into the reply text.
pub trait MessageTransform: Send + Sync {
    fn transform(&self, message: &str) -> Result<String, TaskError>;
}

/// Reverses the message by Unicode scalar value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reverse;

impl MessageTransform for Reverse {
    fn transform(&self, message: &str) -> Result<String, TaskError> {
        Ok(message.chars().rev().collect())
    }
}

/// Artificial delay before replying, split into cancellable steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub steps: u32,
    pub interval: Duration,
}

impl ThinkTime {
    pub const NONE: ThinkTime = ThinkTime {
        steps: 0,
        interval: Duration::ZERO,
    };
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self {
            steps: 5,
            interval: Duration::from_secs(1),
        }
    }
}

/// Runs reply jobs against a callback client and a transform.
#[derive(Clone)]
pub struct Replier {
    client: Arc<dyn CallbackClient>,
    transform: Arc<dyn MessageTransform>,
    think: ThinkTime,
}

impl Replier {
    /// A replier that reverses messages.
    pub fn new(client: Arc<dyn CallbackClient>, think: ThinkTime) -> Self {
        Self {
            client,
            transform: Arc::new(Reverse),
            think,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn MessageTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Execute one reply job.
    pub async fn run(&self, job: ReplyJob, mut cancel: CancelSignal) -> Result<(), TaskError> {
        let text = job.text.ok_or(TaskError::MissingField("text"))?;
        let response_url = job
            .response_url
            .ok_or(TaskError::MissingField("response_url"))?;

        info!(
            text_length = text.len(),
            think_steps = self.think.steps,
            "reply_started"
        );

        for step in 0..self.think.steps {
            debug!(step = step, "reply_thinking");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(step = step, "reply_cancelled_while_thinking");
                    return Err(TaskError::Cancelled);
                }
                _ = sleep(self.think.interval) => {}
            }
        }

        let reply = self.transform.transform(&text)?;

        if cancel.is_cancelled() {
            info!("reply_cancelled_before_delivery");
            return Err(TaskError::Cancelled);
        }

        self.client
            .post_json(&response_url, &ReplyBody { text: reply })
            .await?;

        info!(response_url_length = response_url.len(), "reply_sent");
        Ok(())
    }
}
