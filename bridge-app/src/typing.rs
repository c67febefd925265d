//! Periodic "typing" presence per chat while a question waits for its reply.

use crate::timer::{RepeatingTask, Timer, TimerHandle};
use bridge_transport::{ChatId, ChatTransport};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;

pub struct TypingCoordinator {
    loops: DashMap<ChatId, TimerHandle>,
    transport: Arc<dyn ChatTransport>,
    timer: Arc<dyn Timer>,
    refresh: Duration,
}

impl TypingCoordinator {
    pub fn new(transport: Arc<dyn ChatTransport>, timer: Arc<dyn Timer>, refresh: Duration) -> Self {
        Self {
            loops: DashMap::new(),
            transport,
            timer,
            refresh,
        }
    }

    /// Show typing now and keep refreshing it. Returns false if a loop already runs for the chat.
    #[tracing::instrument(level = "debug", skip_all, fields(chat_id = %chat_id))]
    pub async fn start(&self, chat_id: &ChatId) -> bool {
        if !self.begin(chat_id) {
            return false;
        }
        self.announce(chat_id).await;
        true
    }

    /// Cancel the refresh loop and clear presence. Returns false if no loop was running.
    #[tracing::instrument(level = "debug", skip_all, fields(chat_id = %chat_id))]
    pub async fn stop(&self, chat_id: &ChatId) -> bool {
        if !self.cancel(chat_id) {
            return false;
        }
        self.clear(chat_id).await;
        true
    }

    /// Register the refresh loop without any transport call.
    pub fn begin(&self, chat_id: &ChatId) -> bool {
        match self.loops.entry(chat_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let handle = self
                    .timer
                    .schedule_repeating(self.refresh, self.refresh_task(chat_id.clone()));
                slot.insert(handle);
                true
            }
        }
    }

    /// Drop and cancel the refresh loop without any transport call.
    pub fn cancel(&self, chat_id: &ChatId) -> bool {
        let Some((_, handle)) = self.loops.remove(chat_id) else {
            return false;
        };
        handle.cancel();
        true
    }

    /// One immediate typing update; failures are logged.
    pub async fn announce(&self, chat_id: &ChatId) {
        if let Err(error) = self.transport.send_typing(chat_id).await {
            tracing::warn!(chat_id = %chat_id, %error, "initial typing state failed");
        }
    }

    /// Clear presence; failures are logged.
    pub async fn clear(&self, chat_id: &ChatId) {
        if let Err(error) = self.transport.clear_typing(chat_id).await {
            tracing::warn!(chat_id = %chat_id, %error, "clearing typing state failed");
        }
    }

    pub fn is_active(&self, chat_id: &ChatId) -> bool {
        self.loops.contains_key(chat_id)
    }

    pub fn active_count(&self) -> usize {
        self.loops.len()
    }

    fn refresh_task(&self, chat_id: ChatId) -> RepeatingTask {
        let transport = Arc::clone(&self.transport);
        Arc::new(move || {
            let transport = Arc::clone(&transport);
            let chat_id = chat_id.clone();
            async move {
                if let Err(error) = transport.send_typing(&chat_id).await {
                    tracing::warn!(chat_id = %chat_id, %error, "typing refresh failed");
                }
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingTransport, TransportCall};
    use crate::timer::TokioTimer;

    const REFRESH: Duration = Duration::from_secs(10);

    fn coordinator() -> (Arc<RecordingTransport>, TypingCoordinator) {
        let transport = Arc::new(RecordingTransport::new());
        let typing = TypingCoordinator::new(transport.clone(), Arc::new(TokioTimer), REFRESH);
        (transport, typing)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn start_sends_immediately_then_refreshes_every_period() {
        let (transport, typing) = coordinator();
        let chat = ChatId::new("g1@g.us");

        assert!(typing.start(&chat).await);
        assert_eq!(transport.typing_count(&chat), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(transport.typing_count(&chat), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn second_start_does_not_spawn_another_loop() {
        let (transport, typing) = coordinator();
        let chat = ChatId::new("g1@g.us");

        assert!(typing.start(&chat).await);
        assert!(!typing.start(&chat).await);
        assert_eq!(typing.active_count(), 1);

        tokio::time::sleep(Duration::from_secs(10) + Duration::from_millis(1)).await;
        assert_eq!(transport.typing_count(&chat), 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stop_cancels_refresh_and_clears_presence() {
        let (transport, typing) = coordinator();
        let chat = ChatId::new("g1@g.us");
        typing.start(&chat).await;

        assert!(typing.stop(&chat).await);
        assert!(!typing.is_active(&chat));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::Typing(chat.clone()),
                TransportCall::ClearTyping(chat.clone()),
            ]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stop_without_loop_makes_no_transport_call() {
        let (transport, typing) = coordinator();
        assert!(!typing.stop(&ChatId::new("g1@g.us")).await);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn begin_and_cancel_touch_only_the_table() {
        let (transport, typing) = coordinator();
        let chat = ChatId::new("g1@g.us");

        assert!(typing.begin(&chat));
        assert!(!typing.begin(&chat));
        assert!(typing.is_active(&chat));
        assert!(typing.cancel(&chat));
        assert!(!typing.cancel(&chat));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn refresh_failures_do_not_end_the_loop() {
        let (transport, typing) = coordinator();
        let chat = ChatId::new("g1@g.us");
        transport.fail_typing(true);

        assert!(typing.start(&chat).await);
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert_eq!(transport.typing_count(&chat), 4);
        assert!(typing.is_active(&chat));
    }
}
