//! Core hook types shared across crates.
//!
//! Hooks are keyed by event *name*. The gateway fires the well-known events
//! listed in [`HookEvent`]; plugins may also subscribe to, and fire, names of
//! their own. The dispatcher lives in `warren-plugins`; this module only holds
//! the trait and the payload so that lower crates can build contexts without
//! depending on the plugin system.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::time::now_ms;

// ── HookEvent ───────────────────────────────────────────────────────────────

/// Lifecycle events emitted by the gateway itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    GatewayStart,
    GatewayStop,
    MessageReceived,
    MessageSent,
    CronFired,
    FileChanged,
    PluginLoaded,
    PluginUnloaded,
}

impl HookEvent {
    /// All variants, for iteration.
    pub const ALL: &'static [HookEvent] = &[
        Self::GatewayStart,
        Self::GatewayStop,
        Self::MessageReceived,
        Self::MessageSent,
        Self::CronFired,
        Self::FileChanged,
        Self::PluginLoaded,
        Self::PluginUnloaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GatewayStart => "gateway_start",
            Self::GatewayStop => "gateway_stop",
            Self::MessageReceived => "message_received",
            Self::MessageSent => "message_sent",
            Self::CronFired => "cron_fired",
            Self::FileChanged => "file_changed",
            Self::PluginLoaded => "plugin_loaded",
            Self::PluginUnloaded => "plugin_unloaded",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── HookContext ─────────────────────────────────────────────────────────────

/// Payload handed to every hook registered for an event.
///
/// All hooks for one dispatch see the same context value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookContext {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    pub fired_at_ms: u64,
}

impl HookContext {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            fired_at_ms: now_ms(),
        }
    }

    pub fn for_event(event: HookEvent, data: Value) -> Self {
        Self::new(event.as_str(), data)
    }
}

// ── HookHandler trait ───────────────────────────────────────────────────────

/// A hook body. The event name it listens on is chosen at registration time.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Human-readable handler name, used in logs and audit entries.
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &HookContext) -> Result<()>;
}

// ── HookStats ───────────────────────────────────────────────────────────────

/// Per-handler counters, updated lock-free from concurrent dispatches.
#[derive(Debug, Default)]
pub struct HookStats {
    pub call_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub total_latency_us: AtomicU64,
}

impl HookStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, latency: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn avg_latency(&self) -> Duration {
        let calls = self.call_count.load(Ordering::Relaxed);
        if calls == 0 {
            return Duration::ZERO;
        }
        let total = self.total_latency_us.load(Ordering::Relaxed);
        Duration::from_micros(total / calls)
    }
}
