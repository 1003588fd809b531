//! Configuration loading, validation, and env substitution.
//!
//! Config files: `warren.toml`, `warren.yaml`, `warren.yml`, or `warren.json`.
//! Searched in `./` then the user config dir (`~/.config/warren/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        config_dir, data_dir, discover_and_load, find_config_file, find_or_default_config_path,
        load_config, save_config,
    },
    schema::{
        ChannelConfig, CronConfig, HeartbeatConfig, PluginEntryConfig, PluginsConfig,
        RateLimitConfig, SandboxConfig, ScanConfig, ServerConfig, ToolsConfig, TrustConfig,
        WarrenConfig, WatcherConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
