//! In-process channel used for local testing and the bundled loopback plugin.
//!
//! Outbound replies are kept in memory; inbound messages are injected with
//! [`LoopbackAdapter::inject`]. Setting `failStart = true` in the channel's
//! config makes `start` fail, which is handy for exercising isolation.

use std::sync::Mutex;

use {anyhow::bail, async_trait::async_trait, tracing::debug, warren_config::ChannelConfig};

use crate::{
    adapter::{ChannelAdapter, InboundSink},
    types::{ChannelMessage, ChannelReply},
};

pub struct LoopbackAdapter {
    id: String,
    sink: Mutex<Option<InboundSink>>,
    sent: Mutex<Vec<ChannelReply>>,
}

impl LoopbackAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sink: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn is_started(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Push a message as if it came from the platform.
    pub async fn inject(&self, msg: ChannelMessage) -> anyhow::Result<()> {
        let sink = self.sink.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(sink) = sink else {
            bail!("loopback channel {} is not started", self.id);
        };
        sink.deliver(msg).await
    }

    /// Replies sent so far, oldest first.
    pub fn sent(&self) -> Vec<ChannelReply> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ChannelAdapter for LoopbackAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, config: &ChannelConfig, sink: InboundSink) -> anyhow::Result<()> {
        let fail = ["failStart", "fail_start"]
            .iter()
            .any(|k| config.extra.get(*k).and_then(|v| v.as_bool()) == Some(true));
        if fail {
            bail!("loopback channel {} configured to fail on start", self.id);
        }
        debug!(adapter = %self.id, channel = sink.channel_id(), "loopback started");
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    async fn send(&self, reply: &ChannelReply) -> anyhow::Result<()> {
        if !self.is_started() {
            bail!("loopback channel {} is not started", self.id);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reply.clone());
        Ok(())
    }
}
