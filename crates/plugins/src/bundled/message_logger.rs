//! `message-logger`: appends every inbound channel message to a JSONL file
//! inside the sandbox.

use std::{
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    tracing::warn,
    warren_common::{
        hooks::{HookContext, HookEvent, HookHandler},
        time::now_ms,
    },
};

use crate::{api::PluginApi, loader::Plugin, manifest::PluginManifest};

pub const PLUGIN_ID: &str = "message-logger";
const DEFAULT_LOG_PATH: &str = "logs/messages.jsonl";

pub struct MessageLoggerPlugin;

impl Plugin for MessageLoggerPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    fn bundled_manifest(&self) -> Option<PluginManifest> {
        let mut manifest = PluginManifest::new(PLUGIN_ID);
        manifest.name = Some("Message logger".into());
        manifest.description = Some("Appends inbound channel messages to a JSONL file".into());
        manifest.config_schema.insert(
            "path".into(),
            serde_json::json!({"type": "string", "default": DEFAULT_LOG_PATH}),
        );
        Some(manifest)
    }

    fn register(&self, api: &mut PluginApi<'_>) -> Result<()> {
        let relative = api
            .config()
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_LOG_PATH)
            .to_string();
        let path = api.resolve_path(&relative)?;
        api.logger()
            .debug(&format!("logging messages to {}", path.display()));
        api.register_hook(
            HookEvent::MessageReceived.as_str(),
            Arc::new(MessageLoggerHook::new(path)),
        )
        .into_result()?;
        Ok(())
    }
}

/// Appends one JSON line per `message_received` event.
pub struct MessageLoggerHook {
    log_path: PathBuf,
    /// Writes go through a mutex so lines never interleave.
    file: Mutex<Option<std::fs::File>>,
}

impl MessageLoggerHook {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            file: Mutex::new(None),
        }
    }

    fn append(&self, line: &str) -> Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            if let Some(parent) = self.log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)?;
            *guard = Some(file);
        }
        if let Some(ref mut f) = *guard {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[async_trait]
impl HookHandler for MessageLoggerHook {
    fn name(&self) -> &str {
        PLUGIN_ID
    }

    async fn handle(&self, ctx: &HookContext) -> Result<()> {
        if ctx.event != HookEvent::MessageReceived.as_str() {
            return Ok(());
        }
        let entry = serde_json::json!({
            "ts": now_ms(),
            "channel": ctx.data.get("source"),
            "sender": ctx.data.get("senderId"),
            "chat": ctx.data.get("chatId"),
            "text": ctx.data.get("text"),
        });
        if let Err(e) = self.append(&entry.to_string()) {
            warn!(plugin = PLUGIN_ID, error = %e, "failed to write log entry");
            return Err(e);
        }
        Ok(())
    }
}
