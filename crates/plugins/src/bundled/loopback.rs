//! `loopback`: registers an in-process channel adapter for local testing.

use std::sync::Arc;

use warren_channels::LoopbackAdapter;

use crate::{api::PluginApi, loader::Plugin, manifest::PluginManifest};

pub const PLUGIN_ID: &str = "loopback";

pub struct LoopbackPlugin {
    adapter: Arc<LoopbackAdapter>,
}

impl Default for LoopbackPlugin {
    fn default() -> Self {
        Self {
            adapter: Arc::new(LoopbackAdapter::new(PLUGIN_ID)),
        }
    }
}

impl LoopbackPlugin {
    /// The adapter this plugin registers, for injecting inbound messages.
    pub fn adapter(&self) -> Arc<LoopbackAdapter> {
        Arc::clone(&self.adapter)
    }
}

impl Plugin for LoopbackPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    fn bundled_manifest(&self) -> Option<PluginManifest> {
        let mut manifest = PluginManifest::new(PLUGIN_ID);
        manifest.name = Some("Loopback channel".into());
        manifest.channels = Some(vec![PLUGIN_ID.into()]);
        Some(manifest)
    }

    fn register(&self, api: &mut PluginApi<'_>) -> anyhow::Result<()> {
        api.register_channel(self.adapter.clone()).into_result()?;
        Ok(())
    }
}
