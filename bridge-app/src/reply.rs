//! Outbound replies coming back from the automation.

use crate::error::{BridgeError, Result};
use crate::tracker::QuestionTracker;
use crate::typing::TypingCoordinator;
use bridge_transport::{ChatId, ChatTransport, OutboundPayload};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub button_text: Option<String>,
}

pub struct ReplyGateway {
    transport: Arc<dyn ChatTransport>,
    typing: Arc<TypingCoordinator>,
    tracker: Arc<QuestionTracker>,
    button_id: String,
    clear_on_reply: bool,
}

impl ReplyGateway {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        typing: Arc<TypingCoordinator>,
        tracker: Arc<QuestionTracker>,
        button_id: impl Into<String>,
        clear_on_reply: bool,
    ) -> Self {
        Self {
            transport,
            typing,
            tracker,
            button_id: button_id.into(),
            clear_on_reply,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn submit_reply(&self, request: ReplyRequest) -> Result<()> {
        let (Some(chat_id), Some(message)) = (
            required(request.chat_id.as_deref()),
            required(request.message.as_deref()),
        ) else {
            return Err(BridgeError::BadRequest(
                "Missing chatId or message".to_string(),
            ));
        };
        let chat_id = ChatId::new(chat_id.trim());

        // Typing has to be gone before the answer lands.
        self.typing.stop(&chat_id).await;

        let payload = match request
            .button_text
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
        {
            Some(label) => OutboundPayload::with_reply_button(message, &self.button_id, label),
            None => OutboundPayload::text(message),
        };
        let with_button = matches!(payload, OutboundPayload::Buttons { .. });

        self.transport
            .send_message(&chat_id, payload)
            .await
            .map_err(BridgeError::TransportFailure)?;
        tracing::info!(chat_id = %chat_id, with_button, "reply delivered");

        if self.clear_on_reply && self.tracker.resolve(&chat_id).is_some() {
            tracing::debug!(chat_id = %chat_id, "pending question resolved by reply");
        }
        Ok(())
    }
}

fn required(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}
