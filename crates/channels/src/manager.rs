//! Channel lifecycle and inbound routing.
//!
//! Each running channel owns one forwarding task that drains its inbound
//! queue in order, drops senders outside `allowFrom`, and hands everything
//! else to the [`AgentInbox`]. Replies from the inbox go back out through the
//! same adapter.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Serialize,
    tokio::{
        sync::{RwLock, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
    warren_config::ChannelConfig,
};

use crate::{
    Error, Result,
    adapter::{ChannelAdapter, ChannelDirectory, InboundSink},
    gating::is_sender_allowed,
    types::{ChannelMessage, ChannelReply},
};

const INBOUND_QUEUE: usize = 256;
const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives every gated inbound message.
#[async_trait]
pub trait AgentInbox: Send + Sync {
    /// Returns the reply text to send back, if any.
    async fn deliver(&self, msg: ChannelMessage) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Default)]
struct ChannelCounters {
    received: AtomicU64,
    dropped: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
}

struct RunningChannel {
    adapter_id: String,
    adapter: Arc<dyn ChannelAdapter>,
    forwarder: JoinHandle<()>,
    counters: Arc<ChannelCounters>,
}

/// A channel id is either mid-start or running. A `stop` that removes a
/// `Starting` slot makes the pending start tear the adapter back down.
enum Slot {
    Starting { adapter_id: String, token: u64 },
    Running(RunningChannel),
}

impl Slot {
    fn adapter_id(&self) -> &str {
        match self {
            Self::Starting { adapter_id, .. } => adapter_id,
            Self::Running(ch) => &ch.adapter_id,
        }
    }

    fn running(&self) -> Option<&RunningChannel> {
        match self {
            Self::Starting { .. } => None,
            Self::Running(ch) => Some(ch),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub id: String,
    pub adapter: String,
    pub running: bool,
    pub received: u64,
    pub dropped: u64,
    pub forwarded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelFailure {
    pub channel: String,
    pub error: String,
}

/// Outcome of [`ChannelManager::start_all`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct StartReport {
    pub started: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<ChannelFailure>,
}

pub struct ChannelManager {
    directory: Arc<dyn ChannelDirectory>,
    inbox: Arc<dyn AgentInbox>,
    slots: RwLock<HashMap<String, Slot>>,
    next_token: AtomicU64,
    start_timeout: Duration,
}

impl ChannelManager {
    pub fn new(directory: Arc<dyn ChannelDirectory>, inbox: Arc<dyn AgentInbox>) -> Self {
        Self {
            directory,
            inbox,
            slots: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Start every enabled channel. One channel failing does not affect the
    /// others; failures are collected in the report.
    pub async fn start_all(&self, configs: &BTreeMap<String, ChannelConfig>) -> StartReport {
        let mut report = StartReport::default();
        let mut pending = Vec::new();
        for (id, config) in configs {
            if !config.enabled {
                debug!(channel = %id, "channel disabled, skipping");
                report.skipped.push(id.clone());
                continue;
            }
            pending.push(async move { (id.clone(), self.start(id, config).await) });
        }

        for (id, result) in futures::future::join_all(pending).await {
            match result {
                Ok(()) => report.started.push(id),
                Err(e) => {
                    warn!(channel = %id, error = %e, "channel failed to start");
                    report.failed.push(ChannelFailure {
                        channel: id,
                        error: e.to_string(),
                    });
                },
            }
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "channels started"
        );
        report
    }

    /// Start one channel. Starting a running channel is a no-op; starting a
    /// channel whose start is still in flight is rejected.
    pub async fn start(&self, id: &str, config: &ChannelConfig) -> Result<()> {
        let adapter_id = config.adapter.clone().unwrap_or_else(|| id.to_string());
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut slots = self.slots.write().await;
            match slots.get(id) {
                Some(Slot::Running(_)) => {
                    debug!(channel = id, "channel already running");
                    return Ok(());
                },
                Some(Slot::Starting { .. }) => {
                    return Err(Error::unavailable(format!("channel {id} is already starting")));
                },
                None => {},
            }
            slots.insert(id.to_string(), Slot::Starting {
                adapter_id: adapter_id.clone(),
                token,
            });
        }

        let adapter = match self.directory.adapter(&adapter_id) {
            Some(adapter) => adapter,
            None => {
                self.release_start(id, token).await;
                return Err(Error::not_found(&adapter_id));
            },
        };

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let sink = InboundSink::new(id, tx);

        let started = tokio::time::timeout(self.start_timeout, adapter.start(config, sink)).await;
        let failure = match started {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(Error::adapter(id, &e)),
            Err(_) => Some(Error::AdapterFailure {
                channel: id.to_string(),
                message: format!("start timed out after {:?}", self.start_timeout),
            }),
        };
        if let Some(err) = failure {
            self.release_start(id, token).await;
            // Release whatever the adapter acquired before failing.
            if let Err(e) = adapter.stop().await {
                debug!(channel = id, error = %e, "stop after failed start also failed");
            }
            return Err(err);
        }

        {
            let mut slots = self.slots.write().await;
            if matches!(slots.get(id), Some(Slot::Starting { token: t, .. }) if *t == token) {
                let counters = Arc::new(ChannelCounters::default());
                let forwarder = tokio::spawn(forward(
                    id.to_string(),
                    config.allow_from.clone(),
                    Arc::clone(&adapter),
                    Arc::clone(&self.inbox),
                    Arc::clone(&counters),
                    rx,
                ));
                slots.insert(
                    id.to_string(),
                    Slot::Running(RunningChannel {
                        adapter_id: adapter_id.clone(),
                        adapter,
                        forwarder,
                        counters,
                    }),
                );
                info!(channel = id, adapter = %adapter_id, "channel started");
                return Ok(());
            }
        }

        info!(channel = id, "channel stopped while starting");
        drop(rx);
        if let Err(e) = adapter.stop().await {
            warn!(channel = id, error = %e, "channel stop failed");
        }
        Err(Error::unavailable(format!("channel {id} was stopped while starting")))
    }

    /// Drop the `Starting` slot this start owns, if it is still there.
    async fn release_start(&self, id: &str, token: u64) {
        let mut slots = self.slots.write().await;
        if matches!(slots.get(id), Some(Slot::Starting { token: t, .. }) if *t == token) {
            slots.remove(id);
        }
    }

    /// Stop one channel. Stopping a channel that is not running is a no-op.
    /// Stopping a channel mid-start makes that start undo itself and fail.
    ///
    /// The channel is removed even when the adapter's own `stop` fails.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let channel = match self.slots.write().await.remove(id) {
            Some(Slot::Running(channel)) => channel,
            Some(Slot::Starting { .. }) => {
                debug!(channel = id, "cancelled in-flight start");
                return Ok(());
            },
            None => return Ok(()),
        };
        let result = channel.adapter.stop().await;
        channel.forwarder.abort();
        info!(channel = id, "channel stopped");
        result.map_err(|e| Error::adapter(id, &e))
    }

    /// Stop every channel served by `adapter_id`. Returns the channel ids.
    pub async fn stop_adapter(&self, adapter_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.adapter_id() == adapter_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Err(e) = self.stop(id).await {
                warn!(channel = %id, error = %e, "channel stop failed");
            }
        }
        ids
    }

    pub async fn stop_all(&self) {
        let drained: Vec<(String, RunningChannel)> = self
            .slots
            .write()
            .await
            .drain()
            .filter_map(|(id, slot)| match slot {
                Slot::Running(channel) => Some((id, channel)),
                Slot::Starting { .. } => None,
            })
            .collect();
        let stops = drained.into_iter().map(|(id, channel)| async move {
            let result = channel.adapter.stop().await;
            channel.forwarder.abort();
            if let Err(e) = result {
                warn!(channel = %id, error = %e, "channel stop failed");
            }
        });
        futures::future::join_all(stops).await;
        debug!("all channels stopped");
    }

    /// Send an outbound message through a running channel.
    pub async fn send(&self, reply: &ChannelReply) -> Result<()> {
        if reply.chat_id.trim().is_empty() {
            return Err(Error::invalid_input("chatId is required"));
        }
        if reply.text.is_empty() {
            return Err(Error::invalid_input("text is required"));
        }

        let adapter = self
            .slots
            .read()
            .await
            .get(&reply.channel_id)
            .and_then(Slot::running)
            .map(|ch| Arc::clone(&ch.adapter));
        let Some(adapter) = adapter else {
            if self.directory.adapter(&reply.channel_id).is_some() {
                return Err(Error::unavailable(format!(
                    "channel {} is not running",
                    reply.channel_id
                )));
            }
            return Err(Error::not_found(&reply.channel_id));
        };

        adapter
            .send(reply)
            .await
            .map_err(|e| Error::adapter(&reply.channel_id, &e))
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.slots
            .read()
            .await
            .get(id)
            .is_some_and(|slot| slot.running().is_some())
    }

    /// Running channels plus registered adapters that are not running.
    pub async fn status(&self) -> Vec<ChannelStatus> {
        let slots = self.slots.read().await;
        let mut out: Vec<ChannelStatus> = slots
            .iter()
            .filter_map(|(id, slot)| slot.running().map(|ch| (id, ch)))
            .map(|(id, ch)| ChannelStatus {
                id: id.clone(),
                adapter: ch.adapter_id.clone(),
                running: true,
                received: ch.counters.received.load(Ordering::Relaxed),
                dropped: ch.counters.dropped.load(Ordering::Relaxed),
                forwarded: ch.counters.forwarded.load(Ordering::Relaxed),
                failed: ch.counters.failed.load(Ordering::Relaxed),
            })
            .collect();

        for adapter_id in self.directory.adapter_ids() {
            let in_use = slots.values().any(|slot| slot.adapter_id() == adapter_id);
            if !in_use {
                out.push(ChannelStatus {
                    id: adapter_id.clone(),
                    adapter: adapter_id,
                    running: false,
                    received: 0,
                    dropped: 0,
                    forwarded: 0,
                    failed: 0,
                });
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

async fn forward(
    channel_id: String,
    allow_from: Option<Vec<String>>,
    adapter: Arc<dyn ChannelAdapter>,
    inbox: Arc<dyn AgentInbox>,
    counters: Arc<ChannelCounters>,
    mut rx: mpsc::Receiver<ChannelMessage>,
) {
    while let Some(msg) = rx.recv().await {
        counters.received.fetch_add(1, Ordering::Relaxed);

        if !is_sender_allowed(&msg.sender_id, allow_from.as_deref()) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                channel = %channel_id,
                sender = %msg.sender_id,
                "dropping message from sender outside allowFrom"
            );
            continue;
        }

        let target = ChannelReply::to_message(&msg, String::new());
        match inbox.deliver(msg).await {
            Ok(Some(text)) if !text.trim().is_empty() => {
                let reply = ChannelReply { text, ..target };
                if let Err(e) = adapter.send(&reply).await {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(channel = %channel_id, error = %e, "failed to send reply");
                }
            },
            Ok(_) => {},
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %channel_id, error = %e, "inbound message handling failed");
            },
        }
        counters.forwarded.fetch_add(1, Ordering::Relaxed);
    }
    debug!(channel = %channel_id, "inbound forwarder finished");
}
