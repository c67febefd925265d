use crate::config::StatusConfig;
use crate::error::BridgeError;
use crate::link::LinkState;
use crate::reply::ReplyGateway;
use crate::server::AppState;
use crate::timer::TokioTimer;
use crate::tracker::QuestionTracker;
use crate::typing::TypingCoordinator;
use crate::webhook::{QuestionForwarder, QuestionPayload};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bridge_transport::{
    ChatId, ChatInfo, ChatTransport, OutboundPayload, RecentMessage, SenderId, TransportEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    FetchRecent { chat_id: ChatId, limit: usize },
    Typing(ChatId),
    ClearTyping(ChatId),
    Send { chat_id: ChatId, payload: OutboundPayload },
    ResetSession,
}

/// In-memory transport that records every call in order.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    history: Mutex<Vec<RecentMessage>>,
    fail_typing: AtomicBool,
    fail_send: AtomicBool,
    fail_fetch: AtomicBool,
    fail_reset: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(self, history: Vec<RecentMessage>) -> Self {
        *self.history.lock().expect("history lock") = history;
        self
    }

    pub fn fail_typing(&self, fail: bool) {
        self.fail_typing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reset(&self, fail: bool) {
        self.fail_reset.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn typing_count(&self, chat_id: &ChatId) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Typing(id) if id == chat_id))
            .count()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

pub fn recent(from: &str, body: &str, timestamp: i64) -> RecentMessage {
    RecentMessage {
        from: SenderId::new(from),
        body: body.to_string(),
        timestamp,
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn transport_id(&self) -> &str {
        "recording"
    }

    async fn start(&self, _tx: mpsc::Sender<TransportEvent>) -> Result<()> {
        Ok(())
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatInfo> {
        Ok(ChatInfo {
            id: chat_id.clone(),
            name: String::new(),
            is_group: true,
        })
    }

    async fn fetch_recent_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
    ) -> Result<Vec<RecentMessage>> {
        self.record(TransportCall::FetchRecent {
            chat_id: chat_id.clone(),
            limit,
        });
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(anyhow!("fetch failed"));
        }
        let history = self.history.lock().expect("history lock").clone();
        let skip = history.len().saturating_sub(limit);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn send_typing(&self, chat_id: &ChatId) -> Result<()> {
        self.record(TransportCall::Typing(chat_id.clone()));
        if self.fail_typing.load(Ordering::SeqCst) {
            return Err(anyhow!("presence update rejected"));
        }
        Ok(())
    }

    async fn clear_typing(&self, chat_id: &ChatId) -> Result<()> {
        self.record(TransportCall::ClearTyping(chat_id.clone()));
        Ok(())
    }

    async fn send_message(&self, chat_id: &ChatId, payload: OutboundPayload) -> Result<()> {
        self.record(TransportCall::Send {
            chat_id: chat_id.clone(),
            payload,
        });
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(anyhow!("chat not found: {chat_id}"));
        }
        Ok(())
    }

    async fn reset_session(&self) -> Result<()> {
        self.record(TransportCall::ResetSession);
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(anyhow!("permission denied"));
        }
        Ok(())
    }
}

/// Forwarder that keeps every payload instead of posting it.
#[derive(Default)]
pub struct RecordingForwarder {
    payloads: Mutex<Vec<QuestionPayload>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Hold every dispatch this long before recording it.
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    pub fn payloads(&self) -> Vec<QuestionPayload> {
        self.payloads.lock().expect("payloads lock").clone()
    }
}

#[async_trait]
impl QuestionForwarder for RecordingForwarder {
    async fn dispatch(&self, payload: &QuestionPayload) -> crate::error::Result<()> {
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.payloads
            .lock()
            .expect("payloads lock")
            .push(payload.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::WebhookDispatch(
                "webhook responded 503".to_string(),
            ));
        }
        Ok(())
    }
}

/// Route-level state over a recording transport, with default status settings and no reset token.
pub fn app_state(transport: Arc<RecordingTransport>) -> Arc<AppState> {
    let timer = Arc::new(TokioTimer);
    let tracker = Arc::new(QuestionTracker::new(timer.clone(), Duration::from_secs(300)));
    let typing = Arc::new(TypingCoordinator::new(
        transport.clone(),
        timer,
        Duration::from_secs(10),
    ));
    let replies = Arc::new(ReplyGateway::new(
        transport.clone(),
        typing.clone(),
        tracker.clone(),
        "btn_1",
        true,
    ));
    Arc::new(AppState {
        transport,
        tracker,
        typing,
        replies,
        link: Arc::new(LinkState::new()),
        status: StatusConfig::default(),
        reset_token: None,
        started_at: Instant::now(),
    })
}
