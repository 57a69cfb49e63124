//! Slack Web API delivery

use super::{AlertError, AlertSink};
use crate::config::defaults::{SLACK_HTTP_TIMEOUT_SECS, SLACK_POST_MESSAGE_URL};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts alerts with `chat.postMessage`.
pub struct SlackSink {
    client: reqwest::Client,
    url: String,
    token: String,
    channel: String,
}

impl SlackSink {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Result<Self, AlertError> {
        Self::with_url(SLACK_POST_MESSAGE_URL, token, channel)
    }

    /// Same as [`SlackSink::new`] against another endpoint (proxies, tests).
    pub fn with_url(
        url: impl Into<String>,
        token: impl Into<String>,
        channel: impl Into<String>,
    ) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SLACK_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl AlertSink for SlackSink {
    async fn send_alert(&self, text: &str) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&PostMessage {
                channel: &self.channel,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::ServerError(status));
        }

        let body: PostMessageResponse = response.json().await?;
        if body.ok {
            debug!(channel = %self.channel, "Slack message posted");
            Ok(())
        } else {
            Err(AlertError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    fn sink_name(&self) -> &str {
        "slack"
    }
}
