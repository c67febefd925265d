//! Delayed and periodic task scheduling with explicit cancellation.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub type OnceTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
pub type RepeatingTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to a scheduled task. Dropping it does not cancel the task.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub trait Timer: Send + Sync {
    /// Run `task` once after `delay` unless cancelled first.
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle;

    /// Run `task` every `period`, first run one period from now, until cancelled.
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle;
}

#[derive(Debug, Clone, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule_once(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let token = handle.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    task().await;
                }
            }
        });
        handle
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let token = handle.token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                // A cancel that lands while the task runs stops the next tick.
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = task() => {}
                }
            }
        });
        handle
    }
}
