use crate::traits::ChatTransport;
use crate::types::{
    ChatId, ChatInfo, InboundMessage, OutboundPayload, RecentMessage, SenderId, TransportEvent,
};
use anyhow::{Result, anyhow};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

const TRANSPORT_ID: &str = "http-bridge";
const RECENT_EVENT_ID_CAPACITY: usize = 4096;
const REPLY_BUTTON_HEADER_TYPE: u8 = 1;

/// Chat client reached through an HTTP sidecar that owns the real session
/// (connection, pairing, message primitives).
#[derive(Clone)]
pub struct HttpBridgeTransport {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
    poll_interval: Duration,
    start_from_latest: bool,
    auth_dir: Option<PathBuf>,
}

impl HttpBridgeTransport {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = normalize_http_url(base_url, "transport.base_url")?;
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url,
            auth_token: None,
            poll_interval: Duration::from_millis(1500),
            start_from_latest: true,
            auth_dir: None,
        })
    }

    pub fn with_auth_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_start_from_latest(mut self, start_from_latest: bool) -> Self {
        self.start_from_latest = start_from_latest;
        self
    }

    /// Directory where the sidecar persists its linked-session credentials.
    pub fn with_auth_dir(mut self, auth_dir: Option<PathBuf>) -> Self {
        self.auth_dir = auth_dir;
        self
    }

    fn authorized_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("transport base_url cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn chat_endpoint(&self, chat_id: &ChatId, tail: &[&str]) -> Result<Url> {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(anyhow!("chat_id is required"));
        }
        let mut segments = vec!["chats", chat_id];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpBridgeTransport {
    fn transport_id(&self) -> &str {
        TRANSPORT_ID
    }

    async fn start(&self, tx: mpsc::Sender<TransportEvent>) -> Result<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            if let Err(error) = adapter.run_poll_loop(tx).await {
                tracing::error!(transport = TRANSPORT_ID, %error, "http bridge poll loop exited");
            }
        });
        Ok(())
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<ChatInfo> {
        let url = self.chat_endpoint(chat_id, &[])?;
        let response = self.authorized_request(self.http.get(url)).send().await?;
        let response = ensure_success(response, "get_chat").await?;
        let envelope: ChatEnvelope = response.json().await?;
        envelope
            .into_chat_info()
            .ok_or_else(|| anyhow!("http bridge returned chat without id for {chat_id}"))
    }

    async fn fetch_recent_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
    ) -> Result<Vec<RecentMessage>> {
        let url = self.chat_endpoint(chat_id, &["messages"])?;
        let response = self
            .authorized_request(self.http.get(url))
            .query(&[("limit", limit.to_string())])
            .send()
            .await?;
        let response = ensure_success(response, "fetch_recent_messages").await?;
        let body: serde_json::Value = response.json().await?;
        Ok(normalize_recent_messages(body, limit))
    }

    async fn send_typing(&self, chat_id: &ChatId) -> Result<()> {
        let url = self.chat_endpoint(chat_id, &["typing"])?;
        let response = self.authorized_request(self.http.post(url)).send().await?;
        ensure_success(response, "send_typing").await?;
        Ok(())
    }

    async fn clear_typing(&self, chat_id: &ChatId) -> Result<()> {
        let url = self.chat_endpoint(chat_id, &["typing"])?;
        let response = self.authorized_request(self.http.delete(url)).send().await?;
        ensure_success(response, "clear_typing").await?;
        Ok(())
    }

    async fn send_message(&self, chat_id: &ChatId, payload: OutboundPayload) -> Result<()> {
        if payload.body_text().trim().is_empty() {
            return Err(anyhow!("message content is empty"));
        }
        let url = self.chat_endpoint(chat_id, &["messages"])?;
        let response = self
            .authorized_request(self.http.post(url))
            .json(&OutboundBody::from(&payload))
            .send()
            .await?;
        ensure_success(response, "send_message").await?;
        Ok(())
    }

    async fn reset_session(&self) -> Result<()> {
        let Some(auth_dir) = self.auth_dir.as_deref() else {
            return Err(anyhow!("transport.auth_dir is not configured"));
        };
        match tokio::fs::remove_dir_all(auth_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(anyhow!(
                    "remove session state {}: {e}",
                    auth_dir.display()
                ));
            }
        }
        tracing::info!(auth_dir = %auth_dir.display(), "http bridge session state removed");
        Ok(())
    }
}

impl HttpBridgeTransport {
    #[tracing::instrument(level = "info", skip_all)]
    async fn run_poll_loop(&self, tx: mpsc::Sender<TransportEvent>) -> Result<()> {
        let mut recent_event_ids = VecDeque::<String>::new();
        let mut recent_event_id_set = HashSet::<String>::new();
        let mut seeding = self.start_from_latest;
        // Bumped on every new pairing code so a re-link of the same account is not a duplicate.
        let mut pairing_epoch = 0u64;

        loop {
            let events = match self.poll_once().await {
                Ok(events) => events,
                Err(error) => {
                    tracing::warn!(%error, "http bridge poll failed; retrying");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };
            let mut emitted = 0usize;
            let mut skipped = 0usize;

            for envelope in &events {
                let Some(normalized) = normalize_event(envelope, pairing_epoch) else {
                    continue;
                };
                if recent_event_id_set.contains(&normalized.event_id) {
                    continue;
                }
                remember_event_id(
                    normalized.event_id,
                    &mut recent_event_ids,
                    &mut recent_event_id_set,
                    RECENT_EVENT_ID_CAPACITY,
                );
                if matches!(normalized.event, TransportEvent::Qr(_)) {
                    pairing_epoch += 1;
                }
                // Backlog messages from before startup are not questions for us.
                if seeding && matches!(normalized.event, TransportEvent::Message(_)) {
                    skipped += 1;
                    continue;
                }
                tx.send(normalized.event)
                    .await
                    .map_err(|e| anyhow!("http bridge inbound queue closed: {e}"))?;
                emitted += 1;
            }

            if seeding {
                tracing::info!(skipped, "http bridge seeded event cursor");
                seeding = false;
            }
            tracing::debug!(emitted, "http bridge poll cycle complete");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn poll_once(&self) -> Result<Vec<BridgeEventEnvelope>> {
        let url = self.endpoint(&["events"])?;
        let response = self.authorized_request(self.http.get(url)).send().await?;
        let response = ensure_success(response, "poll events").await?;
        let body: serde_json::Value = response.json().await?;
        Ok(extract_events(body))
    }
}

async fn ensure_success(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|error| format!("<failed to read http bridge error body: {error}>"));
    Err(anyhow!(
        "http bridge {action} failed: status={status} body={body}"
    ))
}

fn normalize_http_url(raw: &str, field: &str) -> Result<Url> {
    let normalized = raw.trim();
    if normalized.is_empty() {
        return Err(anyhow!("{field} is required"));
    }
    let parsed = Url::parse(normalized).map_err(|e| anyhow!("invalid {field}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(anyhow!("invalid {field} scheme: {other}")),
    }
}

#[derive(Debug, Serialize)]
struct OutboundBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    buttons: Vec<WireButton<'a>>,
    #[serde(rename = "headerType", skip_serializing_if = "Option::is_none")]
    header_type: Option<u8>,
}

#[derive(Debug, Serialize)]
struct WireButton<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    reply: WireReply<'a>,
}

#[derive(Debug, Serialize)]
struct WireReply<'a> {
    id: &'a str,
    title: &'a str,
}

impl<'a> From<&'a OutboundPayload> for OutboundBody<'a> {
    fn from(payload: &'a OutboundPayload) -> Self {
        match payload {
            OutboundPayload::Text { text } => Self {
                text,
                buttons: Vec::new(),
                header_type: None,
            },
            OutboundPayload::Buttons { text, buttons } => Self {
                text,
                buttons: buttons
                    .iter()
                    .map(|button| WireButton {
                        kind: "reply",
                        reply: WireReply {
                            id: &button.id,
                            title: &button.title,
                        },
                    })
                    .collect(),
                header_type: Some(REPLY_BUTTON_HEADER_TYPE),
            },
        }
    }
}

fn extract_events(body: serde_json::Value) -> Vec<BridgeEventEnvelope> {
    match body {
        serde_json::Value::Array(events) => events
            .into_iter()
            .filter_map(|event| serde_json::from_value(event).ok())
            .collect(),
        serde_json::Value::Object(mut obj) => {
            if let Some(events) = obj
                .remove("events")
                .and_then(|value| value.as_array().cloned())
            {
                return events
                    .into_iter()
                    .filter_map(|event| serde_json::from_value(event).ok())
                    .collect();
            }
            serde_json::from_value(serde_json::Value::Object(obj))
                .ok()
                .into_iter()
                .collect()
        }
        _ => Vec::new(),
    }
}

fn normalize_recent_messages(body: serde_json::Value, limit: usize) -> Vec<RecentMessage> {
    let entries = match body {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut obj) => obj
            .remove("messages")
            .and_then(|value| value.as_array().cloned())
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    let mut messages: Vec<RecentMessage> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<HistoryEnvelope>(entry).ok())
        .filter_map(HistoryEnvelope::into_recent_message)
        .collect();
    if messages.len() > limit {
        messages.drain(..messages.len() - limit);
    }
    messages
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

#[derive(Debug)]
struct NormalizedEvent {
    event_id: String,
    event: TransportEvent,
}

/// Without a sidecar id, message ids are derived from content so a shifted
/// event window does not re-deliver what was already seen.
fn normalize_event(envelope: &BridgeEventEnvelope, pairing_epoch: u64) -> Option<NormalizedEvent> {
    let explicit_id = non_blank(envelope.id.as_deref());
    let kind = envelope
        .kind
        .as_deref()
        .unwrap_or("message")
        .trim()
        .to_ascii_lowercase();

    match kind.as_str() {
        "qr" => {
            let code = non_blank(envelope.code.as_deref())?;
            Some(NormalizedEvent {
                event_id: explicit_id.unwrap_or_else(|| format!("qr:{code}")),
                event: TransportEvent::Qr(code),
            })
        }
        "ready" => {
            let own_id = non_blank(envelope.own_id.as_deref())?;
            Some(NormalizedEvent {
                event_id: explicit_id.unwrap_or_else(|| match envelope.timestamp {
                    Some(timestamp) => format!("ready:{own_id}:{timestamp}"),
                    None => format!("ready:{own_id}:epoch{pairing_epoch}"),
                }),
                event: TransportEvent::Ready {
                    own_id: SenderId::new(own_id),
                },
            })
        }
        "message" => {
            let chat = envelope.chat.clone()?.into_chat_info()?;
            let sender_id = non_blank(envelope.author.as_deref())
                .or_else(|| non_blank(envelope.from.as_deref()))?;
            let body = envelope.body.clone().unwrap_or_default();
            let event_id = explicit_id.unwrap_or_else(|| {
                let stamp = envelope
                    .timestamp
                    .map(|timestamp| timestamp.to_string())
                    .unwrap_or_default();
                format!("{}:{}:{}:{}", chat.id, sender_id, stamp, body_digest(&body))
            });
            let timestamp = envelope
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp());
            let message = InboundMessage {
                message_id: event_id.clone().into(),
                chat,
                body,
                mentioned_ids: envelope
                    .mentioned_ids
                    .iter()
                    .filter_map(|id| non_blank(Some(id.as_str())))
                    .map(SenderId::new)
                    .collect(),
                sender_id: SenderId::new(sender_id),
                timestamp,
            };
            Some(NormalizedEvent {
                event_id,
                event: TransportEvent::Message(message),
            })
        }
        _ => None,
    }
}

fn body_digest(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((byte & 0x0f) as u32, 16).unwrap_or('0'));
    }
    out
}

fn remember_event_id(
    event_id: String,
    order: &mut VecDeque<String>,
    set: &mut HashSet<String>,
    max_capacity: usize,
) {
    if set.insert(event_id.clone()) {
        order.push_back(event_id);
    }
    while order.len() > max_capacity {
        if let Some(evicted) = order.pop_front() {
            set.remove(&evicted);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ChatEnvelope {
    id: Option<String>,
    name: Option<String>,
    is_group: Option<bool>,
}

impl ChatEnvelope {
    fn into_chat_info(self) -> Option<ChatInfo> {
        let id = non_blank(self.id.as_deref())?;
        Some(ChatInfo {
            id: ChatId::new(id),
            name: self.name.unwrap_or_default(),
            is_group: self.is_group.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct BridgeEventEnvelope {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    own_id: Option<String>,
    chat: Option<ChatEnvelope>,
    body: Option<String>,
    mentioned_ids: Vec<String>,
    author: Option<String>,
    from: Option<String>,
    timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct HistoryEnvelope {
    author: Option<String>,
    from: Option<String>,
    body: Option<String>,
    timestamp: Option<i64>,
}

impl HistoryEnvelope {
    fn into_recent_message(self) -> Option<RecentMessage> {
        let from =
            non_blank(self.author.as_deref()).or_else(|| non_blank(self.from.as_deref()))?;
        Some(RecentMessage {
            from: SenderId::new(from),
            body: self.body.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_default(),
        })
    }
}
