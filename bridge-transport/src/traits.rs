use crate::types::{ChatId, ChatInfo, OutboundPayload, RecentMessage, TransportEvent};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Unique transport identifier, used in logs.
    fn transport_id(&self) -> &str;

    /// Start receiving events. Push to tx for each QR code, ready signal and message.
    async fn start(&self, tx: mpsc::Sender<TransportEvent>) -> Result<()>;

    /// Look up chat metadata by id.
    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatInfo>;

    /// Most recent messages in the chat, oldest first, at most `limit` entries.
    async fn fetch_recent_messages(&self, chat_id: &ChatId, limit: usize)
    -> Result<Vec<RecentMessage>>;

    /// Show the "typing" presence in the chat. Remote clients expire it after a few seconds.
    async fn send_typing(&self, chat_id: &ChatId) -> Result<()>;

    /// Clear any presence state previously set in the chat.
    async fn clear_typing(&self, chat_id: &ChatId) -> Result<()>;

    async fn send_message(&self, chat_id: &ChatId, payload: OutboundPayload) -> Result<()>;

    /// Wipe persisted authentication state so the next start requires re-pairing.
    async fn reset_session(&self) -> Result<()> {
        Err(anyhow::anyhow!(
            "reset_session is not supported by this transport"
        ))
    }
}
