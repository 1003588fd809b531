//! Plugin discovery and activation.
//!
//! A plugin directory holds a `warren.plugin.json` manifest, the plugin's
//! sources (scanned, never executed) and optionally an `.origin` file naming
//! where it was fetched from. The executable part is a compiled [`Plugin`]
//! looked up by id in the [`PluginCatalog`].

use std::{
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, info, warn},
    warren_common::{Classify, ErrorKind},
    warren_config::{PluginEntryConfig, PluginsConfig, ScanConfig},
    warren_security::PathJail,
};

use crate::{
    Error, Result,
    api::PluginApi,
    hooks::panic_message,
    manifest::{MANIFEST_FILE, PluginManifest, parse_manifest},
    origin::{PluginOrigin, TrustDecision, TrustPolicy, manifest_digest},
    registry::PluginRegistry,
    scan::CodeScanner,
};

/// File inside a plugin directory naming its origin (URL or path).
pub const ORIGIN_FILE: &str = ".origin";

/// Compiled plugin entry point.
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    /// Manifest for plugins compiled into the binary. Directory plugins are
    /// described by their `warren.plugin.json` and return `None`.
    fn bundled_manifest(&self) -> Option<PluginManifest> {
        None
    }

    fn register(&self, api: &mut PluginApi<'_>) -> anyhow::Result<()>;
}

/// Entry points available to the loader, keyed by plugin id.
#[derive(Default, Clone)]
pub struct PluginCatalog {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.plugins.insert(plugin.id().to_string(), plugin);
        self
    }

    #[must_use]
    pub fn with(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.add(plugin);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    fn bundled(&self) -> impl Iterator<Item = (PluginManifest, &Arc<dyn Plugin>)> {
        self.plugins
            .values()
            .filter_map(|p| p.bundled_manifest().map(|m| (m, p)))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadFailure {
    pub dir: Option<PathBuf>,
    pub plugin_id: Option<String>,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Disabled in config.
    pub skipped: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

/// A plugin directory after manifest parsing, before activation.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub dir: PathBuf,
    pub manifest: PluginManifest,
    pub origin: PluginOrigin,
    pub digest: String,
}

enum DirOutcome {
    Loaded(String),
    Disabled(String),
}

pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    catalog: PluginCatalog,
    trust: TrustPolicy,
    scan: ScanConfig,
    entries: BTreeMap<String, PluginEntryConfig>,
    sandbox_root: PathBuf,
}

impl PluginLoader {
    pub fn new(
        registry: Arc<PluginRegistry>,
        catalog: PluginCatalog,
        config: &PluginsConfig,
        sandbox_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            catalog,
            trust: TrustPolicy::from_config(&config.trust),
            scan: config.scan.clone(),
            entries: config.entries.clone(),
            sandbox_root: sandbox_root.into(),
        }
    }

    fn enabled(&self, id: &str) -> bool {
        self.entries.get(id).is_none_or(|e| e.enabled)
    }

    fn plugin_config(&self, id: &str) -> Value {
        self.entries
            .get(id)
            .map(|e| e.config.clone())
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Load bundled plugins, then every plugin directory under `dirs`.
    ///
    /// Plugins are independent: one failing never stops the rest.
    pub async fn load_all(&self, dirs: &[PathBuf]) -> LoadReport {
        let mut report = LoadReport::default();

        for (manifest, plugin) in self.catalog.bundled() {
            let id = manifest.id.clone();
            if !self.enabled(&id) {
                debug!(plugin = %id, "plugin disabled, skipping");
                report.skipped.push(id);
                continue;
            }
            let digest = manifest_digest(&serde_json::to_vec(&manifest).unwrap_or_default());
            let trust = self
                .trust
                .evaluate(&manifest, &PluginOrigin::Bundled, &digest);
            match self.activate(manifest, PluginOrigin::Bundled, trust, plugin.as_ref()) {
                Ok(()) => report.loaded.push(id),
                Err(e) => report.failed.push(failure(None, Some(id), &e)),
            }
        }

        for dir in discover_plugin_dirs(dirs) {
            match self.load_dir(&dir).await {
                Ok(DirOutcome::Loaded(id)) => report.loaded.push(id),
                Ok(DirOutcome::Disabled(id)) => report.skipped.push(id),
                Err((plugin_id, e)) => report.failed.push(failure(Some(dir), plugin_id, &e)),
            }
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "plugins loaded"
        );
        report
    }

    /// Load one plugin directory. Errors carry the plugin id once known.
    async fn load_dir(
        &self,
        dir: &Path,
    ) -> std::result::Result<DirOutcome, (Option<String>, Error)> {
        let found = read_plugin_dir(dir).map_err(|e| (None, e))?;
        let id = found.manifest.id.clone();
        if !self.enabled(&id) {
            debug!(plugin = %id, "plugin disabled, skipping");
            return Ok(DirOutcome::Disabled(id));
        }
        let fail = |e: Error| (Some(id.clone()), e);

        let trust = self
            .trust
            .evaluate(&found.manifest, &found.origin, &found.digest);
        if let TrustDecision::Denied { reason } = &trust {
            return Err(fail(Error::denied(&id, reason.clone())));
        }

        if self.scan.enabled {
            let scanner = CodeScanner::new(&self.scan.allowed_hosts)
                .map_err(&fail)?
                .with_max_file_bytes(self.scan.max_file_bytes);
            let report = scanner.scan(dir).await.map_err(&fail)?;
            if !report.passed {
                for finding in &report.findings {
                    warn!(
                        plugin = %id,
                        rule = finding.rule.as_str(),
                        file = %finding.file.display(),
                        line = finding.line,
                        snippet = %finding.snippet,
                        "code scan finding"
                    );
                }
                return Err(fail(Error::denied(
                    &id,
                    format!("code scan failed: {}", report.summary()),
                )));
            }
        }

        let Some(plugin) = self.catalog.get(&id) else {
            return Err(fail(Error::MissingEntryPoint {
                plugin_id: id.clone(),
            }));
        };

        self.activate(found.manifest, found.origin, trust, plugin.as_ref())
            .map_err(&fail)?;
        Ok(DirOutcome::Loaded(id))
    }

    /// Register the plugin and run its `register()`. Any failure, including a
    /// panic, unloads whatever it had registered.
    pub fn activate(
        &self,
        manifest: PluginManifest,
        origin: PluginOrigin,
        trust: TrustDecision,
        plugin: &dyn Plugin,
    ) -> Result<()> {
        let id = manifest.id.clone();
        if let TrustDecision::Denied { reason } = &trust {
            return Err(Error::denied(&id, reason.clone()));
        }
        self.registry
            .register_plugin(manifest, origin.clone(), trust.clone())?;

        let mut api = PluginApi::new(
            &id,
            &self.registry,
            trust,
            self.plugin_config(&id),
            PathJail::new(&self.sandbox_root),
        );
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.register(&mut api)));
        let (admitted, denied) = api.counts();

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
        };
        if let Some(message) = error {
            if let Err(e) = self.registry.unload(&id) {
                warn!(plugin = %id, error = %e, "cleanup after failed register also failed");
            }
            warn!(plugin = %id, error = %message, "plugin register failed");
            return Err(Error::RegisterFailed {
                plugin_id: id,
                message,
            });
        }

        info!(plugin = %id, origin = %origin, admitted, denied, "plugin loaded");
        Ok(())
    }
}

fn failure(dir: Option<PathBuf>, plugin_id: Option<String>, e: &Error) -> LoadFailure {
    LoadFailure {
        dir,
        plugin_id,
        kind: e.kind(),
        reason: e.to_string(),
    }
}

/// Subdirectories of `dirs` that contain a manifest, sorted per root.
pub fn discover_plugin_dirs(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in dirs {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %root.display(), error = %e, "plugin dir not readable");
                continue;
            },
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.join(MANIFEST_FILE).is_file())
            .collect();
        dirs.sort();
        found.extend(dirs);
    }
    found
}

/// Read and validate the manifest and origin of one plugin directory.
pub fn read_plugin_dir(dir: &Path) -> Result<DiscoveredPlugin> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let bytes = std::fs::read(&manifest_path).map_err(|e| Error::io(&manifest_path, e))?;
    let manifest = parse_manifest(&bytes)?;
    let origin_path = dir.join(ORIGIN_FILE);
    let origin = match std::fs::read_to_string(&origin_path) {
        Ok(raw) if !raw.trim().is_empty() => PluginOrigin::parse(&raw),
        _ => PluginOrigin::Local(dir.to_path_buf()),
    };
    Ok(DiscoveredPlugin {
        dir: dir.to_path_buf(),
        manifest,
        origin,
        digest: manifest_digest(&bytes),
    })
}
