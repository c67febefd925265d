//! Inbound event loop: the transport feeds a single queue, the gateway
//! turns mentions into tracked questions and forwards them.
//!
//! Tracker and typing-table decisions happen in the loop, in arrival order.
//! Everything that waits on the network afterwards runs as its own task, so
//! one slow webhook never holds up other chats.

use crate::link::LinkState;
use crate::pairing;
use crate::tracker::{ExpiryHook, MentionOutcome, PendingQuestion, QuestionTracker};
use crate::typing::TypingCoordinator;
use crate::webhook::{QuestionForwarder, QuestionPayload};
use bridge_transport::{ChatTransport, InboundMessage, RecentMessage, TransportEvent};
use futures_util::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    NotGroup,
    Reset { cleared: bool },
    NotLinked,
    Duplicate,
    Accepted,
    Ignored,
}

pub struct Gateway {
    transport: Arc<dyn ChatTransport>,
    tracker: Arc<QuestionTracker>,
    typing: Arc<TypingCoordinator>,
    forwarder: Arc<dyn QuestionForwarder>,
    link: Arc<LinkState>,
    reset_phrase: String,
    recent_limit: usize,
    tasks: TaskTracker,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TransportEvent>>>,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        tracker: Arc<QuestionTracker>,
        typing: Arc<TypingCoordinator>,
        forwarder: Arc<dyn QuestionForwarder>,
        link: Arc<LinkState>,
        reset_phrase: &str,
        recent_limit: usize,
        inbound_rx: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            transport,
            tracker,
            typing,
            forwarder,
            link,
            reset_phrase: reset_phrase.trim().to_lowercase(),
            recent_limit,
            tasks: TaskTracker::new(),
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(shutdown).await })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(&self, shutdown: CancellationToken) {
        loop {
            let event = {
                let mut rx = self.inbound_rx.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => None,
                    event = rx.recv() => event,
                }
            };
            let Some(event) = event else {
                break;
            };
            self.handle_event(event).await;
        }

        self.tasks.close();
        tracing::info!(in_flight = self.tasks.len(), "gateway loop stopped; draining");
        self.tasks.wait().await;
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Qr(code) => {
                match pairing::render_terminal(&code) {
                    Ok(rendered) => {
                        tracing::info!("scan this code to link the session\n{rendered}")
                    }
                    Err(error) => {
                        tracing::warn!(%error, qr = %code, "pairing code could not be rendered")
                    }
                }
                self.link.on_qr(code).await;
            }
            TransportEvent::Ready { own_id } => {
                tracing::info!(own_id = %own_id, "chat session ready");
                self.link.on_ready(own_id).await;
            }
            TransportEvent::Message(message) => {
                let outcome = self.handle_message(message).await;
                tracing::debug!(?outcome, "inbound message handled");
            }
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(chat_id = %message.chat.id, message_id = %message.message_id)
    )]
    pub async fn handle_message(&self, message: InboundMessage) -> MessageOutcome {
        if !message.chat.is_group {
            return MessageOutcome::NotGroup;
        }
        let chat_id = message.chat.id.clone();

        if !self.reset_phrase.is_empty() && message.body.to_lowercase().contains(&self.reset_phrase)
        {
            let cleared = self.tracker.on_manual_reset(&chat_id).is_some();
            if self.typing.cancel(&chat_id) {
                let typing = Arc::clone(&self.typing);
                self.tasks.spawn(
                    async move {
                        typing.clear(&chat_id).await;
                    }
                    .in_current_span(),
                );
            }
            tracing::info!(cleared, "tracker reset by chat command");
            return MessageOutcome::Reset { cleared };
        }

        let Some(own_id) = self.link.own_id().await else {
            return MessageOutcome::NotLinked;
        };
        if message.sender_id == own_id || !message.mentions(&own_id) {
            return MessageOutcome::Ignored;
        }

        let question = PendingQuestion {
            question: message.body.clone(),
            from: message.sender_id.clone(),
            timestamp: message.timestamp,
        };
        if self
            .tracker
            .on_mention(&chat_id, question, self.expiry_hook())
            == MentionOutcome::Duplicate
        {
            tracing::info!("question already pending, mention suppressed");
            return MessageOutcome::Duplicate;
        }
        tracing::info!(from = %message.sender_id, "tracking new question");

        self.typing.begin(&chat_id);
        let job = ForwardJob {
            transport: Arc::clone(&self.transport),
            typing: Arc::clone(&self.typing),
            forwarder: Arc::clone(&self.forwarder),
            recent_limit: self.recent_limit,
            message,
        };
        self.tasks.spawn(job.run().in_current_span());
        MessageOutcome::Accepted
    }

    fn expiry_hook(&self) -> ExpiryHook {
        let typing = Arc::clone(&self.typing);
        Box::new(move |chat_id| {
            async move {
                typing.stop(&chat_id).await;
            }
            .boxed()
        })
    }
}

/// Network tail of an accepted mention: typing, context, webhook.
struct ForwardJob {
    transport: Arc<dyn ChatTransport>,
    typing: Arc<TypingCoordinator>,
    forwarder: Arc<dyn QuestionForwarder>,
    recent_limit: usize,
    message: InboundMessage,
}

impl ForwardJob {
    async fn run(self) {
        let chat_id = &self.message.chat.id;
        self.typing.announce(chat_id).await;

        let payload = QuestionPayload {
            group_name: self.group_name().await,
            chat_id: chat_id.clone(),
            triggered_by: self.message.sender_id.clone(),
            question: self.message.body.clone(),
            messages: self.recent_context().await,
        };
        if let Err(error) = self.forwarder.dispatch(&payload).await {
            // Tracker and typing stay as they are; the timeout still applies.
            tracing::error!(%error, "forwarding question failed");
        }
    }

    async fn group_name(&self) -> String {
        let chat = &self.message.chat;
        if !chat.name.trim().is_empty() {
            return chat.name.clone();
        }
        match self.transport.get_chat(&chat.id).await {
            Ok(info) if !info.name.trim().is_empty() => info.name,
            Ok(_) => chat.id.to_string(),
            Err(error) => {
                tracing::warn!(%error, "chat lookup failed");
                chat.id.to_string()
            }
        }
    }

    async fn recent_context(&self) -> Vec<RecentMessage> {
        let message = &self.message;
        let fallback = || {
            vec![RecentMessage {
                from: message.sender_id.clone(),
                body: message.body.clone(),
                timestamp: message.timestamp,
            }]
        };
        match self
            .transport
            .fetch_recent_messages(&message.chat.id, self.recent_limit)
            .await
        {
            Ok(messages) if messages.is_empty() => fallback(),
            Ok(mut messages) => {
                let skip = messages.len().saturating_sub(self.recent_limit);
                messages.split_off(skip)
            }
            Err(error) => {
                tracing::warn!(%error, "fetching recent messages failed");
                fallback()
            }
        }
    }
}
