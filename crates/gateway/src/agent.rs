//! Glue between the gateway and the conversational agent.
//!
//! The agent itself lives outside this workspace; the gateway only talks to
//! it through [`AgentBridge`]. Inbound channel messages reach it through
//! [`GatewayInbox`], scheduled jobs through [`GatewayDispatcher`].

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::json,
    tracing::{debug, info, warn},
    warren_channels::{AgentInbox, ChannelManager, ChannelMessage, ChannelReply},
    warren_common::hooks::HookEvent,
    warren_cron::{
        CronFire, HEARTBEAT_JOB_ID, Heartbeat, JobDispatcher, JobOutcome, SystemEventsQueue,
    },
    warren_plugins::HookRunner,
};

#[async_trait]
pub trait AgentBridge: Send + Sync {
    /// Reply to a chat message. `None` means stay silent.
    async fn handle_message(&self, msg: &ChannelMessage) -> anyhow::Result<Option<String>>;

    /// Run a prompt with no chat attached (cron jobs, heartbeats).
    async fn prompt(&self, text: &str) -> anyhow::Result<String>;
}

/// Repeats what it is told. Lets a fresh install run end to end.
pub struct EchoAgent;

#[async_trait]
impl AgentBridge for EchoAgent {
    async fn handle_message(&self, msg: &ChannelMessage) -> anyhow::Result<Option<String>> {
        Ok(Some(format!("echo: {}", msg.text)))
    }

    async fn prompt(&self, text: &str) -> anyhow::Result<String> {
        Ok(format!("echo: {text}"))
    }
}

/// Inbound path from the channel manager to the agent.
pub struct GatewayInbox {
    hooks: Arc<HookRunner>,
    agent: Arc<dyn AgentBridge>,
}

impl GatewayInbox {
    pub fn new(hooks: Arc<HookRunner>, agent: Arc<dyn AgentBridge>) -> Self {
        Self { hooks, agent }
    }
}

#[async_trait]
impl AgentInbox for GatewayInbox {
    async fn deliver(&self, msg: ChannelMessage) -> anyhow::Result<Option<String>> {
        self.hooks.emit(HookEvent::MessageReceived, json!(msg)).await;

        let reply = self.agent.handle_message(&msg).await?;
        if let Some(text) = &reply {
            let out = ChannelReply::to_message(&msg, text.clone());
            self.hooks.emit(HookEvent::MessageSent, json!(out)).await;
        }
        Ok(reply)
    }
}

/// Runs fired cron jobs against the agent.
///
/// The heartbeat job gets its prompt from the heartbeat settings and is
/// skipped outside active hours. Other jobs prompt the agent with their
/// message. Output goes to the job's channel target when it has one and
/// otherwise lands in the system events queue for the next heartbeat.
pub struct GatewayDispatcher {
    hooks: Arc<HookRunner>,
    agent: Arc<dyn AgentBridge>,
    channels: Arc<ChannelManager>,
    heartbeat: Arc<Heartbeat>,
}

impl GatewayDispatcher {
    pub fn new(
        hooks: Arc<HookRunner>,
        agent: Arc<dyn AgentBridge>,
        channels: Arc<ChannelManager>,
        heartbeat: Arc<Heartbeat>,
    ) -> Self {
        Self {
            hooks,
            agent,
            channels,
            heartbeat,
        }
    }

    fn events(&self) -> &Arc<SystemEventsQueue> {
        self.heartbeat.events()
    }

    async fn run_heartbeat(&self, fire: &CronFire) -> anyhow::Result<JobOutcome> {
        if !self.heartbeat.is_active_at(chrono::Utc::now()) {
            return Ok(JobOutcome::Skipped("outside active hours".into()));
        }
        let prompt = self.heartbeat.take_prompt().await;
        let reply = self.agent.prompt(&prompt).await?;
        let Some(text) = self.heartbeat.filter_reply(&reply) else {
            debug!("heartbeat acknowledged, nothing to deliver");
            return Ok(JobOutcome::Completed(None));
        };
        self.deliver(fire, &text).await?;
        Ok(JobOutcome::Completed(Some(text)))
    }

    async fn run_job(&self, fire: &CronFire) -> anyhow::Result<JobOutcome> {
        let output = self.agent.prompt(&fire.message).await?;
        if output.trim().is_empty() {
            return Ok(JobOutcome::Completed(None));
        }
        if !self.deliver(fire, &output).await? {
            self.events()
                .enqueue(
                    format!("Job '{}' finished: {}", fire.job_name, first_line(&output)),
                    format!("cron:{}", fire.job_id),
                )
                .await;
        }
        Ok(JobOutcome::Completed(Some(output)))
    }

    /// Send `text` to the job's target. False when the job has none.
    async fn deliver(&self, fire: &CronFire, text: &str) -> anyhow::Result<bool> {
        let Some(target) = &fire.target else {
            return Ok(false);
        };
        let (Some(channel), Some(chat_id)) = (&target.channel, &target.chat_id) else {
            warn!(job = %fire.job_id, "job target lacks a channel or chat id, not delivering");
            return Ok(false);
        };
        let reply = ChannelReply {
            channel_id: channel.clone(),
            chat_id: chat_id.clone(),
            text: text.to_string(),
            reply_to_id: None,
        };
        self.channels.send(&reply).await?;
        self.hooks.emit(HookEvent::MessageSent, json!(reply)).await;
        info!(job = %fire.job_id, channel = %channel, "delivered job output");
        Ok(true)
    }
}

#[async_trait]
impl JobDispatcher for GatewayDispatcher {
    async fn dispatch(&self, fire: &CronFire) -> anyhow::Result<JobOutcome> {
        self.hooks.emit(HookEvent::CronFired, json!(fire)).await;
        if fire.system && fire.job_id == HEARTBEAT_JOB_ID {
            self.run_heartbeat(fire).await
        } else {
            self.run_job(fire).await
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
