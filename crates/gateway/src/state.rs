use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use {
    serde_json::json,
    tokio::{sync::broadcast::error::RecvError, task::JoinHandle},
    tracing::{debug, info, warn},
    warren_channels::{ChannelManager, StartReport},
    warren_common::{hooks::HookEvent, time::now_ms},
    warren_config::WarrenConfig,
    warren_cron::{
        CronJobPatch, CronService, CronStore, FileStore, HEARTBEAT_JOB_ID, Heartbeat,
        InMemoryStore, SystemEventsQueue,
    },
    warren_plugins::{
        AuditLog, HookRunner, LoadReport, PluginCatalog, PluginLoader, PluginRegistry,
        bundled::bundled_catalog,
    },
    warren_security::{PathJail, RateLimiter, ToolPolicy},
};

use crate::{
    agent::{AgentBridge, EchoAgent, GatewayDispatcher, GatewayInbox},
    bootstrap::{GitBootstrap, ensure_git_repo},
    watcher::{FsWatcher, WatchIgnores},
};

/// Read once at startup from the sandbox root when present.
const HEARTBEAT_FILE: &str = "HEARTBEAT.md";

/// Everything the gateway shares between handlers and background tasks.
///
/// Built once by [`GatewayBuilder`] and passed around behind an `Arc`.
pub struct GatewayState {
    pub config: WarrenConfig,
    pub data_dir: PathBuf,
    pub jail: PathJail,
    pub registry: Arc<PluginRegistry>,
    pub hooks: Arc<HookRunner>,
    pub channels: Arc<ChannelManager>,
    pub cron: Arc<CronService>,
    pub heartbeat: Arc<Heartbeat>,
    pub tool_policy: ToolPolicy,
    pub rate_limiter: RateLimiter,
    pub agent: Arc<dyn AgentBridge>,
    pub started_at_ms: u64,
    loader: PluginLoader,
    watcher: Mutex<Option<Arc<FsWatcher>>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

/// What [`GatewayState::startup`] did.
#[derive(Debug)]
pub struct StartupReport {
    pub git: Option<GitBootstrap>,
    pub plugins: LoadReport,
    pub channels: StartReport,
    pub cron_running: bool,
    pub watching: bool,
}

pub struct GatewayBuilder {
    config: WarrenConfig,
    data_dir: PathBuf,
    agent: Option<Arc<dyn AgentBridge>>,
    catalog: Option<PluginCatalog>,
    cron_store: Option<Arc<dyn CronStore>>,
}

impl GatewayBuilder {
    pub fn new(config: WarrenConfig, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            data_dir: data_dir.into(),
            agent: None,
            catalog: None,
            cron_store: None,
        }
    }

    /// Defaults to [`EchoAgent`].
    pub fn agent(mut self, agent: Arc<dyn AgentBridge>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Defaults to the bundled catalog.
    pub fn catalog(mut self, catalog: PluginCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Defaults to a file store under the data dir, or memory when cron is
    /// disabled.
    pub fn cron_store(mut self, store: Arc<dyn CronStore>) -> Self {
        self.cron_store = Some(store);
        self
    }

    pub fn build(self) -> Arc<GatewayState> {
        let Self {
            config,
            data_dir,
            agent,
            catalog,
            cron_store,
        } = self;

        let sandbox_root = config.sandbox.resolve_root(&data_dir);
        let jail = PathJail::new(&sandbox_root);
        let agent = agent.unwrap_or_else(|| Arc::new(EchoAgent));

        let registry = Arc::new(PluginRegistry::new(Arc::new(AuditLog::new())));
        let hooks = Arc::new(HookRunner::new(Arc::clone(&registry)));
        let loader = PluginLoader::new(
            Arc::clone(&registry),
            catalog.unwrap_or_else(bundled_catalog),
            &config.plugins,
            jail.root(),
        );

        let channels = Arc::new(ChannelManager::new(
            registry.clone(),
            Arc::new(GatewayInbox::new(Arc::clone(&hooks), Arc::clone(&agent))),
        ));

        let heartbeat_md = std::fs::read_to_string(jail.root().join(HEARTBEAT_FILE)).ok();
        let heartbeat = Arc::new(Heartbeat::new(
            &config.heartbeat,
            heartbeat_md.as_deref(),
            Arc::new(SystemEventsQueue::new()),
        ));

        let store = cron_store.unwrap_or_else(|| default_cron_store(&config, &data_dir));
        let dispatcher = Arc::new(GatewayDispatcher::new(
            Arc::clone(&hooks),
            Arc::clone(&agent),
            Arc::clone(&channels),
            Arc::clone(&heartbeat),
        ));
        let cron = CronService::new(store, dispatcher);

        Arc::new(GatewayState {
            tool_policy: ToolPolicy::from_config(&config.tools),
            rate_limiter: RateLimiter::new(config.rate_limit),
            started_at_ms: now_ms(),
            config,
            data_dir,
            jail,
            registry,
            hooks,
            channels,
            cron,
            heartbeat,
            agent,
            loader,
            watcher: Mutex::new(None),
            watch_task: Mutex::new(None),
        })
    }
}

/// Job file used by the default store: `cron.jobs_path`, else
/// `<data_dir>/cron/jobs.json`. Run history lives next to it.
pub fn cron_jobs_path(config: &WarrenConfig, data_dir: &Path) -> PathBuf {
    config
        .cron
        .jobs_path
        .clone()
        .unwrap_or_else(|| data_dir.join("cron").join("jobs.json"))
}

fn default_cron_store(config: &WarrenConfig, data_dir: &Path) -> Arc<dyn CronStore> {
    if !config.cron.enabled {
        return Arc::new(InMemoryStore::new());
    }
    Arc::new(FileStore::at(cron_jobs_path(config, data_dir)))
}

impl GatewayState {
    pub fn builder(config: WarrenConfig, data_dir: impl Into<PathBuf>) -> GatewayBuilder {
        GatewayBuilder::new(config, data_dir)
    }

    pub fn sandbox_root(&self) -> &Path {
        self.jail.root()
    }

    /// Configured plugin directories, relative ones resolved against the
    /// data dir, plus `<data_dir>/plugins`.
    pub fn plugin_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .config
            .plugins
            .dirs
            .iter()
            .map(|d| {
                if d.is_absolute() {
                    d.clone()
                } else {
                    self.data_dir.join(d)
                }
            })
            .collect();
        let default = self.data_dir.join("plugins");
        if !dirs.contains(&default) {
            dirs.push(default);
        }
        dirs
    }

    /// Load the catalog and every plugin directory into the registry.
    /// Failures are logged and reported, never fatal.
    pub async fn load_plugins(&self) -> LoadReport {
        let report = self.loader.load_all(&self.plugin_dirs()).await;
        for failure in &report.failed {
            warn!(
                plugin = failure.plugin_id.as_deref().unwrap_or("?"),
                kind = %failure.kind,
                reason = %failure.reason,
                "plugin failed to load"
            );
        }
        report
    }

    /// Bring every subsystem up in dependency order.
    ///
    /// Only a broken cron store aborts startup. Plugin, channel, watcher
    /// and git failures are logged and reported.
    pub async fn startup(self: &Arc<Self>) -> anyhow::Result<StartupReport> {
        let git = self.config.sandbox.git_init.then(|| {
            ensure_git_repo(self.sandbox_root(), &self.config.sandbox.database_file)
        });

        let plugins = self.load_plugins().await;
        for id in &plugins.loaded {
            self.hooks
                .emit(HookEvent::PluginLoaded, json!({ "pluginId": id }))
                .await;
        }

        let channels = self.channels.start_all(&self.config.channels).await;

        self.cron.load().await?;
        if self.config.cron.enabled {
            if let Err(e) = self.sync_heartbeat_job().await {
                warn!(error = %e, "heartbeat job not installed");
            }
            self.cron.start().await?;
        }

        let watching = self.config.watcher.enabled && self.start_watcher();

        self.hooks
            .emit(
                HookEvent::GatewayStart,
                json!({
                    "plugins": plugins.loaded,
                    "channels": channels.started,
                }),
            )
            .await;

        Ok(StartupReport {
            git,
            plugins,
            channels,
            cron_running: self.cron.is_running(),
            watching,
        })
    }

    /// Reverse of [`startup`](Self::startup). Safe to call more than once.
    pub async fn shutdown(&self) {
        self.hooks.emit(HookEvent::GatewayStop, json!({})).await;
        self.cron.stop().await;
        self.channels.stop_all().await;
        self.stop_watcher();
        info!("gateway subsystems stopped");
    }

    /// Make the stored heartbeat job match the config.
    async fn sync_heartbeat_job(&self) -> warren_cron::Result<()> {
        let desired = Heartbeat::job(&self.config.heartbeat)?;
        let existing = self.cron.get(HEARTBEAT_JOB_ID).await;
        match (desired, existing) {
            (None, None) => Ok(()),
            (None, Some(_)) => self.cron.remove(HEARTBEAT_JOB_ID).await,
            (Some(create), None) => {
                let job = self.cron.add(create).await?;
                info!(job = %job.id, "heartbeat job installed");
                Ok(())
            },
            (Some(create), Some(job)) => {
                if job.enabled && job.schedule == create.schedule && job.target == create.target {
                    return Ok(());
                }
                let patch = CronJobPatch {
                    schedule: Some(create.schedule),
                    target: create.target,
                    enabled: Some(true),
                    ..CronJobPatch::default()
                };
                self.cron.update(HEARTBEAT_JOB_ID, patch).await?;
                info!(job = HEARTBEAT_JOB_ID, "heartbeat job updated");
                Ok(())
            },
        }
    }

    /// Start watching the sandbox root and forward changes to
    /// `file_changed` hooks. False when the watcher could not start.
    pub fn start_watcher(self: &Arc<Self>) -> bool {
        let ignores =
            WatchIgnores::from_config(&self.config.watcher, &self.config.sandbox.database_file);
        let debounce = std::time::Duration::from_millis(self.config.watcher.debounce_ms);
        let watcher = match FsWatcher::start_with_debounce(self.sandbox_root(), ignores, debounce)
        {
            Ok(w) => Arc::new(w),
            Err(e) => {
                warn!(error = %e, "file watcher not started");
                return false;
            },
        };

        let mut rx = watcher.subscribe();
        let hooks = Arc::clone(&self.hooks);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        hooks.emit(HookEvent::FileChanged, json!(event)).await;
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "file change listener lagged");
                    },
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("file change forwarder finished");
        });

        *self.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(watcher);
        if let Some(old) = self
            .watch_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task)
        {
            old.abort();
        }
        true
    }

    pub fn watcher(&self) -> Option<Arc<FsWatcher>> {
        self.watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn stop_watcher(&self) {
        if let Some(watcher) = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            watcher.close();
        }
        // The forwarder exits on its own once the channel closes.
        drop(
            self.watch_task
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take(),
        );
    }

    /// Unload a plugin after stopping the channels that use its adapters.
    pub async fn unload_plugin(
        &self,
        plugin_id: &str,
    ) -> warren_plugins::Result<(warren_plugins::UnloadReport, Vec<String>)> {
        let Some(summary) = self.registry.plugin(plugin_id) else {
            return Err(warren_plugins::Error::not_found("plugin", plugin_id));
        };
        let mut stopped = Vec::new();
        for adapter in &summary.channels {
            stopped.extend(self.channels.stop_adapter(adapter).await);
        }
        let report = self.registry.unload(plugin_id)?;
        self.hooks
            .emit(
                HookEvent::PluginUnloaded,
                json!({ "pluginId": plugin_id, "stoppedChannels": stopped }),
            )
            .await;
        info!(plugin = %plugin_id, stopped = stopped.len(), "plugin unloaded");
        Ok((report, stopped))
    }
}
