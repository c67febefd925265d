//! Per-chat pending question table.
//!
//! At most one question is pending per chat. The first mention after a
//! reset, reply or expiry wins; later mentions are suppressed until the
//! entry is gone. Every entry carries its own expiry timer, a hard ceiling
//! measured from creation.

use crate::timer::{Timer, TimerHandle};
use bridge_transport::{ChatId, SenderId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingQuestion {
    pub question: String,
    pub from: SenderId,
    /// Epoch seconds of the triggering message.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionOutcome {
    Accepted,
    Duplicate,
}

/// Runs after an entry expired and was removed.
pub type ExpiryHook = Box<dyn FnOnce(ChatId) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug)]
struct TrackedQuestion {
    id: Uuid,
    question: PendingQuestion,
    expiry: TimerHandle,
}

pub struct QuestionTracker {
    pending: Arc<DashMap<ChatId, TrackedQuestion>>,
    timer: Arc<dyn Timer>,
    timeout: Duration,
}

impl QuestionTracker {
    pub fn new(timer: Arc<dyn Timer>, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            timer,
            timeout,
        }
    }

    /// Record `question` for `chat_id` unless one is already pending.
    pub fn on_mention(
        &self,
        chat_id: &ChatId,
        question: PendingQuestion,
        on_expire: ExpiryHook,
    ) -> MentionOutcome {
        let slot = match self.pending.entry(chat_id.clone()) {
            Entry::Occupied(_) => return MentionOutcome::Duplicate,
            Entry::Vacant(slot) => slot,
        };

        let id = Uuid::new_v4();
        let pending = Arc::clone(&self.pending);
        let expired_chat = chat_id.clone();
        let expiry = self.timer.schedule_once(
            self.timeout,
            Box::new(move || {
                async move {
                    // A reset followed by a new mention replaces the entry; leave that one alone.
                    if pending
                        .remove_if(&expired_chat, |_, tracked| tracked.id == id)
                        .is_none()
                    {
                        return;
                    }
                    tracing::info!(chat_id = %expired_chat, "cleared tracked question after timeout");
                    on_expire(expired_chat).await;
                }
                .boxed()
            }),
        );

        slot.insert(TrackedQuestion {
            id,
            question,
            expiry,
        });
        MentionOutcome::Accepted
    }

    /// Drop any pending question for `chat_id`. No-op when none is pending.
    pub fn on_manual_reset(&self, chat_id: &ChatId) -> Option<PendingQuestion> {
        self.take(chat_id)
    }

    /// Drop the pending question once a reply resolved it.
    pub fn resolve(&self, chat_id: &ChatId) -> Option<PendingQuestion> {
        self.take(chat_id)
    }

    fn take(&self, chat_id: &ChatId) -> Option<PendingQuestion> {
        let (_, tracked) = self.pending.remove(chat_id)?;
        tracked.expiry.cancel();
        Some(tracked.question)
    }

    pub fn get(&self, chat_id: &ChatId) -> Option<PendingQuestion> {
        self.pending
            .get(chat_id)
            .map(|tracked| tracked.question.clone())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
