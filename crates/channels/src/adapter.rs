use {async_trait::async_trait, tokio::sync::mpsc, warren_config::ChannelConfig};

use crate::types::{ChannelMessage, ChannelReply};

/// A messaging platform connector registered by a plugin.
///
/// `start` hands the adapter an [`InboundSink`]; every message the platform
/// delivers goes through it. `stop` must be safe to call more than once.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Registry key, e.g. `"telegram"`.
    fn id(&self) -> &str;

    async fn start(&self, config: &ChannelConfig, sink: InboundSink) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn send(&self, reply: &ChannelReply) -> anyhow::Result<()>;
}

/// Lookup of registered adapters by id.
///
/// The channel manager holds one of these instead of owning adapters, so
/// unloading a plugin removes its adapters from a single place.
pub trait ChannelDirectory: Send + Sync {
    fn adapter(&self, id: &str) -> Option<std::sync::Arc<dyn ChannelAdapter>>;
    fn adapter_ids(&self) -> Vec<String>;
}

/// Where an adapter pushes inbound messages.
///
/// Messages are forwarded in the order they are delivered. The channel id is
/// stamped onto `source` so adapters cannot spoof another channel.
#[derive(Clone)]
pub struct InboundSink {
    channel_id: String,
    tx: mpsc::Sender<ChannelMessage>,
}

impl InboundSink {
    pub(crate) fn new(channel_id: impl Into<String>, tx: mpsc::Sender<ChannelMessage>) -> Self {
        Self {
            channel_id: channel_id.into(),
            tx,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Queue a message. Fails once the channel has been stopped.
    pub async fn deliver(&self, mut msg: ChannelMessage) -> anyhow::Result<()> {
        msg.source.clone_from(&self.channel_id);
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("channel {} is stopped", self.channel_id))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
