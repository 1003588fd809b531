/// Config schema types (server, sandbox, plugins, access control, channels, cron).
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    warren_common::CapabilityKind,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarrenConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub plugins: PluginsConfig,
    pub tools: ToolsConfig,
    pub rate_limit: RateLimitConfig,
    /// Channel connections keyed by channel id.
    pub channels: BTreeMap<String, ChannelConfig>,
    pub cron: CronConfig,
    pub heartbeat: HeartbeatConfig,
    pub watcher: WatcherConfig,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18800,
        }
    }
}

/// The agent's home directory and what lives in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Sandbox root. Defaults to `<data_dir>/home`.
    pub root: Option<PathBuf>,
    /// Live database file name, relative to the root. Ignored by the watcher.
    pub database_file: String,
    /// Initialise a git repository in the root on first run (best effort).
    pub git_init: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: None,
            database_file: "warren.db".into(),
            git_init: true,
        }
    }
}

impl SandboxConfig {
    pub fn resolve_root(&self, data_dir: &Path) -> PathBuf {
        self.root.clone().unwrap_or_else(|| data_dir.join("home"))
    }
}

/// Plugin discovery, trust, and per-plugin settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Extra directories scanned for plugin packages. `<data_dir>/plugins`
    /// is always scanned.
    pub dirs: Vec<PathBuf>,
    pub trust: TrustConfig,
    pub scan: ScanConfig,
    /// Per-plugin settings keyed by plugin id.
    pub entries: BTreeMap<String, PluginEntryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Origin prefixes (URLs or paths) whose plugins get the full capability set.
    pub trusted_origins: Vec<String>,
    /// Expected sha256 (hex) of `warren.plugin.json`, keyed by plugin id.
    pub pins: BTreeMap<String, String>,
    /// Capabilities an untrusted plugin may still register.
    pub untrusted_capabilities: Vec<CapabilityKind>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted_origins: Vec::new(),
            pins: BTreeMap::new(),
            untrusted_capabilities: vec![CapabilityKind::Tool, CapabilityKind::Hook],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub enabled: bool,
    /// Hosts plugin code may reference in network calls.
    pub allowed_hosts: Vec<String>,
    /// Source files larger than this many bytes fail the scan.
    pub max_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_hosts: Vec::new(),
            max_file_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginEntryConfig {
    pub enabled: bool,
    /// Opaque options handed to the plugin at registration.
    pub config: serde_json::Value,
}

impl Default for PluginEntryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config: serde_json::Value::Object(Default::default()),
        }
    }
}

/// Tool access policy layered on top of the built-in deny floor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub deny: Vec<String>,
    /// Informational. Never lifts an entry from `deny` or a built-in denial.
    pub allow: Vec<String>,
}

/// Per-caller rate limiting for tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    #[serde(alias = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(alias = "windowMs")]
    pub window_ms: u64,
    #[serde(alias = "lockoutMs")]
    pub lockout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            window_ms: 60_000,
            lockout_ms: 300_000,
        }
    }
}

/// Connection secrets and options for one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// Adapter id to use. Defaults to the channel id.
    pub adapter: Option<String>,
    pub token: Option<String>,
    #[serde(alias = "botToken")]
    pub bot_token: Option<String>,
    #[serde(alias = "appToken")]
    pub app_token: Option<String>,
    #[serde(alias = "authDir")]
    pub auth_dir: Option<PathBuf>,
    /// Sender allow-list. Absent means unrestricted; empty means nobody.
    #[serde(alias = "allowFrom")]
    pub allow_from: Option<Vec<String>>,
    /// Adapter-specific keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            adapter: None,
            token: None,
            bot_token: None,
            app_token: None,
            auth_dir: None,
            allow_from: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub enabled: bool,
    /// Job file. Defaults to `<data_dir>/cron/jobs.json`.
    pub jobs_path: Option<PathBuf>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jobs_path: None,
        }
    }
}

/// Periodic prompt that surfaces pending reminders to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Interval between heartbeats (e.g. "30m", "1h"). Defaults to "30m".
    pub every: String,
    /// Custom prompt override. If empty, `HEARTBEAT.md` or the built-in default is used.
    pub prompt: Option<String>,
    /// Max characters for an acknowledgment reply before it is dropped. Defaults to 300.
    pub ack_max_chars: usize,
    pub active_hours: ActiveHoursConfig,
    /// Channel to deliver non-empty heartbeat replies to.
    pub channel: Option<String>,
    pub chat_id: Option<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every: "30m".into(),
            prompt: None,
            ack_max_chars: 300,
            active_hours: ActiveHoursConfig::default(),
            channel: None,
            chat_id: None,
        }
    }
}

/// Active hours window for heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveHoursConfig {
    /// Start time in HH:MM format. Defaults to "08:00".
    pub start: String,
    /// End time in HH:MM format. Defaults to "24:00".
    pub end: String,
    /// IANA timezone (e.g. "Europe/Paris") or "local". Defaults to "local".
    pub timezone: String,
}

impl Default for ActiveHoursConfig {
    fn default() -> Self {
        Self {
            start: "08:00".into(),
            end: "24:00".into(),
            timezone: "local".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    /// Directory names ignored in addition to the built-in list.
    pub extra_ignores: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
            extra_ignores: Vec::new(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: WarrenConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 18800);
        assert_eq!(cfg.sandbox.database_file, "warren.db");
        assert!(cfg.channels.is_empty());
        assert_eq!(
            cfg.plugins.trust.untrusted_capabilities,
            vec![CapabilityKind::Tool, CapabilityKind::Hook]
        );
    }

    #[test]
    fn channel_keeps_extra_keys_and_allow_list() {
        let cfg: WarrenConfig = toml::from_str(
            r#"
            [channels.telegram]
            bot_token = "abc"
            allow_from = ["alice", "admin_*"]
            poll_timeout = 30
            "#,
        )
        .unwrap();
        let tg = &cfg.channels["telegram"];
        assert!(tg.enabled);
        assert_eq!(tg.bot_token.as_deref(), Some("abc"));
        assert_eq!(tg.allow_from.as_ref().unwrap().len(), 2);
        assert_eq!(tg.extra["poll_timeout"], 30);
    }

    #[test]
    fn camel_case_aliases_accepted() {
        let cfg: WarrenConfig = serde_json::from_str(
            r#"{
                "rate_limit": { "maxAttempts": 3, "windowMs": 1000, "lockoutMs": 5000 },
                "channels": { "slack": { "appToken": "x", "allowFrom": [] } }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.rate_limit, RateLimitConfig {
            max_attempts: 3,
            window_ms: 1000,
            lockout_ms: 5000,
        });
        assert_eq!(cfg.channels["slack"].allow_from, Some(vec![]));
    }

    #[test]
    fn sandbox_root_defaults_under_data_dir() {
        let cfg = SandboxConfig::default();
        assert_eq!(
            cfg.resolve_root(Path::new("/var/lib/warren")),
            PathBuf::from("/var/lib/warren/home")
        );
    }
}
