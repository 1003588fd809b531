//! The handle a plugin receives during `register()`.
//!
//! Every registration goes through [`PluginApi::register`]: shape check,
//! origin trust check, then [`PluginRegistry::admit`]. A refused capability is
//! audited and reported back as [`Admission::Denied`]; it never aborts the
//! plugin's load unless the plugin chooses to propagate it.

use std::{path::PathBuf, sync::Arc};

use {
    http::Method,
    serde_json::Value,
    tracing::{debug, error, info, warn},
    warren_channels::ChannelAdapter,
    warren_common::hooks::HookHandler,
    warren_security::PathJail,
};

use crate::{
    Error, Result,
    capability::{Capability, RouteHandler, Tool},
    origin::TrustDecision,
    registry::PluginRegistry,
};

/// Outcome of one registration call.
#[must_use]
#[derive(Debug)]
pub enum Admission {
    Admitted,
    Denied(Error),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    /// Turn a denial into an error, for plugins that cannot run without the
    /// capability.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Admitted => Ok(()),
            Self::Denied(e) => Err(e),
        }
    }
}

/// Logger that tags every record with the plugin id.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
}

impl PluginLogger {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn debug(&self, message: &str) {
        debug!(plugin = %self.plugin_id, "{message}");
    }

    pub fn info(&self, message: &str) {
        info!(plugin = %self.plugin_id, "{message}");
    }

    pub fn warn(&self, message: &str) {
        warn!(plugin = %self.plugin_id, "{message}");
    }

    pub fn error(&self, message: &str) {
        error!(plugin = %self.plugin_id, "{message}");
    }
}

pub struct PluginApi<'a> {
    plugin_id: String,
    registry: &'a PluginRegistry,
    trust: TrustDecision,
    config: Value,
    jail: PathJail,
    logger: PluginLogger,
    admitted: usize,
    denied: usize,
}

impl<'a> PluginApi<'a> {
    pub fn new(
        plugin_id: impl Into<String>,
        registry: &'a PluginRegistry,
        trust: TrustDecision,
        config: Value,
        jail: PathJail,
    ) -> Self {
        let plugin_id = plugin_id.into();
        Self {
            logger: PluginLogger::new(&plugin_id),
            plugin_id,
            registry,
            trust,
            config,
            jail,
            admitted: 0,
            denied: 0,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Options from `plugins.entries.<id>.config`.
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    /// Resolve a path inside the sandbox root.
    pub fn resolve_path(&self, relative: &str) -> warren_security::Result<PathBuf> {
        self.jail.resolve(relative)
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Admission {
        self.register(Capability::Tool(tool))
    }

    pub fn register_channel(&mut self, adapter: Arc<dyn ChannelAdapter>) -> Admission {
        self.register(Capability::Channel(adapter))
    }

    pub fn register_hook(
        &mut self,
        event: impl Into<String>,
        handler: Arc<dyn HookHandler>,
    ) -> Admission {
        self.register(Capability::Hook {
            event: event.into(),
            handler,
        })
    }

    pub fn register_http_route(
        &mut self,
        method: Method,
        path: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Admission {
        self.register(Capability::HttpRoute {
            method,
            path: path.into(),
            handler,
        })
    }

    pub fn register(&mut self, capability: Capability) -> Admission {
        let kind = capability.kind();
        let key = capability.key();

        let refused = if let Err(message) = capability.validate_shape() {
            self.registry
                .record_denied(&self.plugin_id, kind, &key, &message);
            Some(Error::InvalidCapability {
                kind: kind.as_str(),
                key,
                message,
            })
        } else if !self.trust.allows(kind) {
            let reason = format!("origin is not trusted to register {kind} capabilities");
            self.registry
                .record_denied(&self.plugin_id, kind, &key, &reason);
            Some(Error::denied(&self.plugin_id, reason))
        } else {
            self.registry.admit(&self.plugin_id, capability).err()
        };

        match refused {
            None => {
                self.admitted += 1;
                Admission::Admitted
            },
            Some(e) => {
                self.denied += 1;
                Admission::Denied(e)
            },
        }
    }

    /// (admitted, denied) counts so far.
    pub fn counts(&self) -> (usize, usize) {
        (self.admitted, self.denied)
    }
}
