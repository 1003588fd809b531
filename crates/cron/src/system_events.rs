//! Bounded buffer of background events that the heartbeat drains.
//!
//! Cron runs without a delivery target and other background work enqueue a
//! one-line summary here. The next heartbeat prepends the pending summaries
//! to its prompt.

use std::collections::VecDeque;

use {tokio::sync::Mutex, warren_common::time::now_ms};

/// Oldest entries are dropped beyond this.
pub const MAX_EVENTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemEvent {
    pub text: String,
    /// Origin tag, e.g. `"cron:<id>"`.
    pub reason: String,
    pub enqueued_at_ms: u64,
}

#[derive(Debug, Default)]
pub struct SystemEventsQueue {
    events: Mutex<VecDeque<SystemEvent>>,
}

impl SystemEventsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive duplicates of the same text are collapsed.
    pub async fn enqueue(&self, text: impl Into<String>, reason: impl Into<String>) {
        let text = text.into();
        let mut events = self.events.lock().await;
        if events.back().is_some_and(|last| last.text == text) {
            return;
        }
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(SystemEvent {
            text,
            reason: reason.into(),
            enqueued_at_ms: now_ms(),
        });
    }

    /// FIFO order.
    pub async fn drain(&self) -> Vec<SystemEvent> {
        self.events.lock().await.drain(..).collect()
    }

    pub async fn peek(&self) -> Vec<SystemEvent> {
        self.events.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}
