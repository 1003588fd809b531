//! Capability tables for every loaded plugin.
//!
//! All tables sit behind a single `RwLock`, so a lookup never observes a
//! half-unloaded plugin. The lock is never held across an await: lookups
//! clone the `Arc` out and release it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use {
    http::Method,
    serde::Serialize,
    serde_json::Value,
    tracing::info,
    warren_channels::{ChannelAdapter, ChannelDirectory},
    warren_common::{CapabilityKind, hooks::HookHandler, time::now_ms},
};

use crate::{
    Error, Result,
    audit::{AuditEntry, AuditLog},
    capability::{Capability, RouteHandler, Tool, route_key},
    manifest::PluginManifest,
    origin::{PluginOrigin, TrustDecision},
};

struct Owned<T> {
    owner: String,
    value: T,
}

struct PluginRecord {
    manifest: PluginManifest,
    origin: PluginOrigin,
    trust: TrustDecision,
    loaded_at_ms: u64,
}

#[derive(Default)]
struct Tables {
    plugins: BTreeMap<String, PluginRecord>,
    tools: BTreeMap<String, Owned<Arc<dyn Tool>>>,
    channels: BTreeMap<String, Owned<Arc<dyn ChannelAdapter>>>,
    /// Event name to handlers in registration order.
    hooks: HashMap<String, Vec<Owned<Arc<dyn HookHandler>>>>,
    routes: HashMap<(Method, String), Owned<Arc<dyn RouteHandler>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub origin: PluginOrigin,
    pub trust: TrustDecision,
    pub loaded_at_ms: u64,
    pub tools: Vec<String>,
    pub channels: Vec<String>,
    pub hooks: Vec<String>,
    pub routes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub plugin_id: String,
}

/// Everything a plugin had registered, as removed by [`PluginRegistry::unload`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnloadReport {
    pub plugin_id: String,
    pub tools: Vec<String>,
    pub channels: Vec<String>,
    /// Event names, one per removed handler.
    pub hooks: Vec<String>,
    pub routes: Vec<String>,
}

impl UnloadReport {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
            && self.channels.is_empty()
            && self.hooks.is_empty()
            && self.routes.is_empty()
    }
}

pub struct PluginRegistry {
    tables: RwLock<Tables>,
    audit: Arc<AuditLog>,
}

impl PluginRegistry {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            audit,
        }
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve a plugin id. Fails with `Conflict` if it is already loaded.
    pub fn register_plugin(
        &self,
        manifest: PluginManifest,
        origin: PluginOrigin,
        trust: TrustDecision,
    ) -> Result<()> {
        let mut tables = self.write();
        if tables.plugins.contains_key(&manifest.id) {
            return Err(Error::conflict("plugin", &manifest.id));
        }
        tables.plugins.insert(manifest.id.clone(), PluginRecord {
            manifest,
            origin,
            trust,
            loaded_at_ms: now_ms(),
        });
        Ok(())
    }

    /// Insert a capability that already passed shape and trust checks.
    ///
    /// The audit entry is written under the same lock as the insert, before
    /// the entry becomes visible to lookups.
    pub fn admit(&self, owner: &str, capability: Capability) -> Result<()> {
        let kind = capability.kind();
        let key = capability.key();
        let mut tables = self.write();

        if !tables.plugins.contains_key(owner) {
            self.audit
                .record(AuditEntry::denied(owner, kind, &key, "plugin not loaded"));
            return Err(Error::not_found("plugin", owner));
        }

        let conflict = match &capability {
            Capability::Tool(_) => tables.tools.contains_key(&key),
            Capability::Channel(_) => tables.channels.contains_key(&key),
            Capability::Hook { .. } => false,
            Capability::HttpRoute { method, path, .. } => {
                tables.routes.contains_key(&(method.clone(), path.clone()))
            },
        };
        if conflict {
            self.audit
                .record(AuditEntry::denied(owner, kind, &key, "already registered"));
            return Err(Error::conflict(kind.as_str(), key));
        }

        self.audit.record(AuditEntry::admitted(owner, kind, &key));
        let owner = owner.to_string();
        match capability {
            Capability::Tool(tool) => {
                tables.tools.insert(key, Owned { owner, value: tool });
            },
            Capability::Channel(adapter) => {
                tables.channels.insert(key, Owned {
                    owner,
                    value: adapter,
                });
            },
            Capability::Hook { event, handler } => {
                tables.hooks.entry(event).or_default().push(Owned {
                    owner,
                    value: handler,
                });
            },
            Capability::HttpRoute {
                method,
                path,
                handler,
            } => {
                tables.routes.insert((method, path), Owned {
                    owner,
                    value: handler,
                });
            },
        }
        Ok(())
    }

    /// Record a capability refused before reaching the tables.
    pub fn record_denied(&self, owner: &str, kind: CapabilityKind, key: &str, reason: &str) {
        self.audit
            .record(AuditEntry::denied(owner, kind, key, reason));
    }

    /// Remove a plugin and everything it owns in one step.
    pub fn unload(&self, plugin_id: &str) -> Result<UnloadReport> {
        let mut tables = self.write();
        if tables.plugins.remove(plugin_id).is_none() {
            return Err(Error::not_found("plugin", plugin_id));
        }

        let mut report = UnloadReport {
            plugin_id: plugin_id.to_string(),
            ..Default::default()
        };

        tables.tools.retain(|name, entry| {
            let keep = entry.owner != plugin_id;
            if !keep {
                report.tools.push(name.clone());
            }
            keep
        });
        tables.channels.retain(|id, entry| {
            let keep = entry.owner != plugin_id;
            if !keep {
                report.channels.push(id.clone());
            }
            keep
        });
        for (event, handlers) in tables.hooks.iter_mut() {
            let before = handlers.len();
            handlers.retain(|h| h.owner != plugin_id);
            report
                .hooks
                .extend(std::iter::repeat_n(event.clone(), before - handlers.len()));
        }
        tables.hooks.retain(|_, handlers| !handlers.is_empty());
        tables.routes.retain(|(method, path), entry| {
            let keep = entry.owner != plugin_id;
            if !keep {
                report.routes.push(route_key(method, path));
            }
            keep
        });
        drop(tables);

        report.hooks.sort();
        report.routes.sort();
        info!(
            plugin = plugin_id,
            tools = report.tools.len(),
            channels = report.channels.len(),
            hooks = report.hooks.len(),
            routes = report.routes.len(),
            "plugin unloaded"
        );
        Ok(report)
    }

    pub fn contains_plugin(&self, plugin_id: &str) -> bool {
        self.read().plugins.contains_key(plugin_id)
    }

    pub fn plugins(&self) -> Vec<PluginSummary> {
        let tables = self.read();
        tables
            .plugins
            .iter()
            .map(|(id, record)| summarize(&tables, id, record))
            .collect()
    }

    pub fn plugin(&self, plugin_id: &str) -> Option<PluginSummary> {
        let tables = self.read();
        tables
            .plugins
            .get(plugin_id)
            .map(|record| summarize(&tables, plugin_id, record))
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read().tools.get(name).map(|e| Arc::clone(&e.value))
    }

    pub fn tools(&self) -> Vec<ToolInfo> {
        self.read()
            .tools
            .iter()
            .map(|(name, e)| ToolInfo {
                name: name.clone(),
                description: e.value.description().to_string(),
                input_schema: e.value.input_schema(),
                plugin_id: e.owner.clone(),
            })
            .collect()
    }

    pub fn channel(&self, id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.read().channels.get(id).map(|e| Arc::clone(&e.value))
    }

    /// Owning plugin id and handler for each hook on `event`, in
    /// registration order.
    pub fn hooks_for(&self, event: &str) -> Vec<(String, Arc<dyn HookHandler>)> {
        self.read()
            .hooks
            .get(event)
            .map(|handlers| {
                handlers
                    .iter()
                    .map(|h| (h.owner.clone(), Arc::clone(&h.value)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn route(&self, method: &Method, path: &str) -> Option<(String, Arc<dyn RouteHandler>)> {
        self.read()
            .routes
            .get(&(method.clone(), path.to_string()))
            .map(|e| (e.owner.clone(), Arc::clone(&e.value)))
    }

    /// Whether any route is registered at `path` under another method.
    pub fn has_route_path(&self, path: &str) -> bool {
        self.read().routes.keys().any(|(_, p)| p == path)
    }
}

impl ChannelDirectory for PluginRegistry {
    fn adapter(&self, id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.channel(id)
    }

    fn adapter_ids(&self) -> Vec<String> {
        self.read().channels.keys().cloned().collect()
    }
}

fn summarize(tables: &Tables, id: &str, record: &PluginRecord) -> PluginSummary {
    let owned_by = |owner: &str| owner == id;
    let mut hooks: Vec<String> = tables
        .hooks
        .iter()
        .flat_map(|(event, handlers)| {
            handlers
                .iter()
                .filter(|h| owned_by(&h.owner))
                .map(move |_| event.clone())
        })
        .collect();
    hooks.sort();
    let mut routes: Vec<String> = tables
        .routes
        .iter()
        .filter(|(_, e)| owned_by(&e.owner))
        .map(|((m, p), _)| route_key(m, p))
        .collect();
    routes.sort();

    PluginSummary {
        id: id.to_string(),
        name: record.manifest.display_name().to_string(),
        version: record.manifest.version.clone(),
        description: record.manifest.description.clone(),
        origin: record.origin.clone(),
        trust: record.trust.clone(),
        loaded_at_ms: record.loaded_at_ms,
        tools: tables
            .tools
            .iter()
            .filter(|(_, e)| owned_by(&e.owner))
            .map(|(k, _)| k.clone())
            .collect(),
        channels: tables
            .channels
            .iter()
            .filter(|(_, e)| owned_by(&e.owner))
            .map(|(k, _)| k.clone())
            .collect(),
        hooks,
        routes,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::{
            audit::AuditDecision,
            capability::{PluginRequest, PluginResponse},
        },
        async_trait::async_trait,
        http::StatusCode,
        warren_channels::LoopbackAdapter,
        warren_common::hooks::HookContext,
    };

    pub(crate) struct EchoTool(pub &'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echo params back"
        }

        fn input_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, params: Value) -> anyhow::Result<Value> {
            Ok(params)
        }
    }

    pub(crate) struct NoopHook(pub &'static str);

    #[async_trait]
    impl HookHandler for NoopHook {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle(&self, _ctx: &HookContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Hello;

    #[async_trait]
    impl RouteHandler for Hello {
        async fn handle(&self, _req: PluginRequest) -> anyhow::Result<PluginResponse> {
            Ok(PluginResponse::text(StatusCode::OK, "hello"))
        }
    }

    pub(crate) fn registry_with(ids: &[&str]) -> PluginRegistry {
        let registry = PluginRegistry::new(Arc::new(AuditLog::new()));
        for id in ids {
            registry
                .register_plugin(
                    PluginManifest::new(*id),
                    PluginOrigin::Bundled,
                    TrustDecision::Trusted,
                )
                .unwrap();
        }
        registry
    }

    fn hook(event: &str, name: &'static str) -> Capability {
        Capability::Hook {
            event: event.into(),
            handler: Arc::new(NoopHook(name)),
        }
    }

    fn route(path: &str) -> Capability {
        Capability::HttpRoute {
            method: Method::GET,
            path: path.into(),
            handler: Arc::new(Hello),
        }
    }

    #[test]
    fn duplicate_plugin_id_conflicts() {
        let registry = registry_with(&["a"]);
        let err = registry
            .register_plugin(
                PluginManifest::new("a"),
                PluginOrigin::Bundled,
                TrustDecision::Trusted,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { kind: "plugin", .. }));
    }

    #[test]
    fn duplicate_keys_conflict_per_kind() {
        let registry = registry_with(&["a", "b"]);
        registry
            .admit("a", Capability::Tool(Arc::new(EchoTool("echo"))))
            .unwrap();
        let err = registry
            .admit("b", Capability::Tool(Arc::new(EchoTool("echo"))))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { kind: "tool", .. }));

        registry.admit("a", route("/hello")).unwrap();
        assert!(registry.admit("b", route("/hello")).is_err());
        registry
            .admit("b", Capability::HttpRoute {
                method: Method::POST,
                path: "/hello".into(),
                handler: Arc::new(Hello),
            })
            .unwrap();

        registry
            .admit("a", Capability::Channel(Arc::new(LoopbackAdapter::new("lo"))))
            .unwrap();
        assert!(
            registry
                .admit("b", Capability::Channel(Arc::new(LoopbackAdapter::new("lo"))))
                .is_err()
        );

        // Tool "echo" still belongs to "a".
        assert_eq!(registry.tools()[0].plugin_id, "a");
    }

    #[test]
    fn hooks_keep_registration_order_and_never_conflict() {
        let registry = registry_with(&["a", "b"]);
        registry.admit("a", hook("message_received", "h1")).unwrap();
        registry.admit("b", hook("message_received", "h2")).unwrap();
        registry.admit("a", hook("message_received", "h1")).unwrap();

        let names: Vec<_> = registry
            .hooks_for("message_received")
            .iter()
            .map(|(owner, h)| format!("{owner}/{}", h.name()))
            .collect();
        assert_eq!(names, vec!["a/h1", "b/h2", "a/h1"]);
        assert!(registry.hooks_for("gateway_start").is_empty());
    }

    #[test]
    fn unload_removes_everything_owned() {
        let registry = registry_with(&["a", "b"]);
        registry
            .admit("a", Capability::Tool(Arc::new(EchoTool("t1"))))
            .unwrap();
        registry
            .admit("b", Capability::Tool(Arc::new(EchoTool("t2"))))
            .unwrap();
        registry.admit("a", hook("gateway_start", "h")).unwrap();
        registry.admit("b", hook("gateway_start", "h")).unwrap();
        registry.admit("a", route("/a")).unwrap();
        registry
            .admit("a", Capability::Channel(Arc::new(LoopbackAdapter::new("lo"))))
            .unwrap();

        let report = registry.unload("a").unwrap();
        assert_eq!(report.tools, vec!["t1"]);
        assert_eq!(report.channels, vec!["lo"]);
        assert_eq!(report.hooks, vec!["gateway_start"]);
        assert_eq!(report.routes, vec!["GET /a"]);

        assert!(registry.tool("t1").is_none());
        assert!(registry.tool("t2").is_some());
        assert!(registry.route(&Method::GET, "/a").is_none());
        assert!(registry.channel("lo").is_none());
        assert_eq!(registry.hooks_for("gateway_start").len(), 1);
        assert!(!registry.contains_plugin("a"));

        // The id can be reused once unloaded.
        registry
            .register_plugin(
                PluginManifest::new("a"),
                PluginOrigin::Bundled,
                TrustDecision::Trusted,
            )
            .unwrap();
        assert!(matches!(
            registry.unload("missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn audit_precedes_visibility() {
        let registry = registry_with(&["a"]);
        registry
            .admit("a", Capability::Tool(Arc::new(EchoTool("t"))))
            .unwrap();
        let _ = registry.admit("a", Capability::Tool(Arc::new(EchoTool("t"))));

        let entries = registry.audit().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].decision, AuditDecision::Admitted);
        assert_eq!(entries[1].decision, AuditDecision::Denied);
    }

    #[test]
    fn capabilities_require_a_loaded_owner() {
        let registry = registry_with(&[]);
        let err = registry
            .admit("ghost", Capability::Tool(Arc::new(EchoTool("t"))))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn summary_lists_owned_capabilities() {
        let registry = registry_with(&["a"]);
        registry
            .admit("a", Capability::Tool(Arc::new(EchoTool("t"))))
            .unwrap();
        registry.admit("a", hook("cron_fired", "h")).unwrap();
        let summary = registry.plugin("a").unwrap();
        assert_eq!(summary.tools, vec!["t"]);
        assert_eq!(summary.hooks, vec!["cron_fired"]);
        assert_eq!(registry.plugins().len(), 1);
    }

    #[test]
    fn directory_exposes_channels() {
        let registry = registry_with(&["a"]);
        registry
            .admit("a", Capability::Channel(Arc::new(LoopbackAdapter::new("lo"))))
            .unwrap();
        assert_eq!(registry.adapter_ids(), vec!["lo"]);
        assert!(registry.adapter("lo").is_some());
    }
}
