use bridge_transport::SenderId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Pairing state of the chat session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkSnapshot {
    pub linked: bool,
    pub own_id: Option<SenderId>,
    #[serde(skip)]
    pub qr_code: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct LinkState {
    inner: RwLock<LinkSnapshot>,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on_qr(&self, code: String) {
        let mut state = self.inner.write().await;
        state.linked = false;
        state.qr_code = Some(code);
        state.updated_at = Some(Utc::now());
    }

    pub async fn on_ready(&self, own_id: SenderId) {
        let mut state = self.inner.write().await;
        state.linked = true;
        state.own_id = Some(own_id);
        state.qr_code = None;
        state.updated_at = Some(Utc::now());
    }

    pub async fn snapshot(&self) -> LinkSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn own_id(&self) -> Option<SenderId> {
        self.inner.read().await.own_id.clone()
    }

    /// The code to scan, only while the session is not linked.
    pub async fn pending_qr(&self) -> Option<String> {
        let state = self.inner.read().await;
        if state.linked {
            return None;
        }
        state.qr_code.clone()
    }
}
