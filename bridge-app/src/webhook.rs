//! Forwards accepted questions to the automation webhook.

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use bridge_transport::{ChatId, RecentMessage, SenderId};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub group_name: String,
    pub chat_id: ChatId,
    pub triggered_by: SenderId,
    pub question: String,
    /// Oldest first.
    pub messages: Vec<RecentMessage>,
}

#[async_trait]
pub trait QuestionForwarder: Send + Sync {
    async fn dispatch(&self, payload: &QuestionPayload) -> Result<()>;
}

pub struct WebhookDispatcher {
    http: reqwest::Client,
    url: reqwest::Url,
    auth_token: Option<String>,
}

impl WebhookDispatcher {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(url.trim())
            .map_err(|e| anyhow::anyhow!("invalid webhook url {url:?}: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("webhook url must use http or https");
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url,
            auth_token: None,
        })
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }
}

#[async_trait]
impl QuestionForwarder for WebhookDispatcher {
    #[tracing::instrument(level = "info", skip_all, fields(chat_id = %payload.chat_id))]
    async fn dispatch(&self, payload: &QuestionPayload) -> Result<()> {
        let mut request = self.http.post(self.url.clone()).json(payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(BridgeError::WebhookDispatch(format!(
                "webhook responded {status}: {snippet}"
            )));
        }
        tracing::info!(
            messages = payload.messages.len(),
            "question forwarded to webhook"
        );
        Ok(())
    }
}
