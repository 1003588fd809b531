//! Hook dispatch with per-handler failure isolation.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use {
    futures::FutureExt,
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, warn},
    warren_common::hooks::{HookContext, HookEvent, HookStats},
};

use crate::registry::PluginRegistry;

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookFailure {
    pub plugin_id: String,
    pub hook: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub event: String,
    pub invoked: usize,
    pub succeeded: usize,
    pub failures: Vec<HookFailure>,
}

impl DispatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEventStats {
    pub event: String,
    pub calls: u64,
    pub failures: u64,
    pub avg_latency_ms: u64,
}

pub struct HookRunner {
    registry: Arc<PluginRegistry>,
    stats: Mutex<HashMap<String, Arc<HookStats>>>,
    timeout: Duration,
}

impl HookRunner {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            stats: Mutex::new(HashMap::new()),
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn stats_for(&self, event: &str) -> Arc<HookStats> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(stats.entry(event.to_string()).or_default())
    }

    /// Run every hook registered for `event`, in registration order.
    ///
    /// Each handler sees the same context. A handler that errors, panics or
    /// times out is logged with its plugin id and the next one still runs.
    pub async fn dispatch(&self, event: &str, ctx: &HookContext) -> DispatchOutcome {
        let handlers = self.registry.hooks_for(event);
        let mut outcome = DispatchOutcome {
            event: event.to_string(),
            ..Default::default()
        };
        if handlers.is_empty() {
            return outcome;
        }

        let stats = self.stats_for(event);
        for (plugin_id, handler) in handlers {
            outcome.invoked += 1;
            let started = Instant::now();
            let run = AssertUnwindSafe(handler.handle(ctx)).catch_unwind();
            let error = match tokio::time::timeout(self.timeout, run).await {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(e))) => Some(format!("{e:#}")),
                Ok(Err(panic)) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
                Err(_) => Some(format!("timed out after {:?}", self.timeout)),
            };
            let elapsed = started.elapsed();

            match error {
                None => {
                    stats.record_success(elapsed);
                    outcome.succeeded += 1;
                },
                Some(error) => {
                    stats.record_failure(elapsed);
                    warn!(
                        plugin = %plugin_id,
                        hook = handler.name(),
                        event,
                        error = %error,
                        "hook failed"
                    );
                    outcome.failures.push(HookFailure {
                        plugin_id,
                        hook: handler.name().to_string(),
                        error,
                    });
                },
            }
        }

        debug!(
            event,
            invoked = outcome.invoked,
            failed = outcome.failures.len(),
            "hooks dispatched"
        );
        outcome
    }

    /// Build a context for a well-known event and dispatch it.
    pub async fn emit(&self, event: HookEvent, data: Value) -> DispatchOutcome {
        let ctx = HookContext::for_event(event, data);
        self.dispatch(event.as_str(), &ctx).await
    }

    pub fn stats(&self) -> Vec<HookEventStats> {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<HookEventStats> = stats
            .iter()
            .map(|(event, s)| HookEventStats {
                event: event.clone(),
                calls: s.call_count.load(std::sync::atomic::Ordering::Relaxed),
                failures: s.failure_count.load(std::sync::atomic::Ordering::Relaxed),
                avg_latency_ms: s.avg_latency().as_millis() as u64,
            })
            .collect();
        out.sort_by(|a, b| a.event.cmp(&b.event));
        out
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
