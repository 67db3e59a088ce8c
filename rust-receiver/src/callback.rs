//! Outbound delivery of replies to caller-supplied callback URLs.
//!
//! The receiver makes at most one attempt per reply; retry and timeout policy
//! belong to the client.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::TaskError;

/// JSON body posted to the callback URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyBody {
    pub text: String,
}

/// Posts a reply as JSON to a URL.
#[async_trait]
pub trait CallbackClient: Send + Sync {
    async fn post_json(&self, url: &str, body: &ReplyBody) -> Result<(), TaskError>;
}

/// [`CallbackClient`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpCallbackClient {
    client: Client,
    timeout: Duration,
}

impl HttpCallbackClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(16)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl CallbackClient for HttpCallbackClient {
    async fn post_json(&self, url: &str, body: &ReplyBody) -> Result<(), TaskError> {
        info!(
            url_length = url.len(),
            reply_length = body.text.len(),
            timeout_seconds = self.timeout.as_secs_f64(),
            "callback_post_starting"
        );

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    info!(status_code = status.as_u16(), "callback_post_complete");
                    Ok(())
                } else {
                    error!(status_code = status.as_u16(), "callback_post_rejected");
                    Err(TaskError::CallbackDelivery(format!(
                        "callback responded with status {}",
                        status.as_u16()
                    )))
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    error!(
                        timeout_seconds = self.timeout.as_secs_f64(),
                        error = %e,
                        "callback_post_timeout"
                    );
                } else if e.is_builder() {
                    error!(error = %e, "callback_post_invalid_url");
                } else {
                    error!(error = %e, "callback_post_error");
                }
                Err(TaskError::CallbackDelivery(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory [`CallbackClient`] that records deliveries.

    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingClient {
        calls: Mutex<Vec<(String, ReplyBody)>>,
        fail: bool,
    }

    impl RecordingClient {
        pub fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn calls(&self) -> Vec<(String, ReplyBody)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CallbackClient for RecordingClient {
        async fn post_json(&self, url: &str, body: &ReplyBody) -> Result<(), TaskError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone()));
            if self.fail {
                return Err(TaskError::CallbackDelivery("connection refused".to_string()));
            }
            Ok(())
        }
    }
}
