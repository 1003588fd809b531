//! Plugins compiled into the gateway.

pub mod loopback;
pub mod message_logger;

use std::sync::Arc;

use crate::loader::PluginCatalog;

/// Catalog holding every bundled plugin.
pub fn bundled_catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with(Arc::new(message_logger::MessageLoggerPlugin))
        .with(Arc::new(loopback::LoopbackPlugin::default()))
}
