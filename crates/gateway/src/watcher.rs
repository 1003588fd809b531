//! Filesystem watcher for the sandbox root.
//!
//! Watches the root recursively and broadcasts debounced add/change/remove
//! events with root-relative paths. Version control metadata, dependency
//! caches and the live database file never produce events.

use std::{
    path::{Component, Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use {
    anyhow::Result,
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode},
    },
    serde::Serialize,
    tokio::sync::broadcast,
    tracing::{debug, info, warn},
    warren_config::WatcherConfig,
};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

const EVENT_BUFFER: usize = 256;

/// Directory names ignored at any depth.
const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target"];

/// Suffixes SQLite puts next to the database file.
const DB_SIDECARS: &[&str] = &["-wal", "-shm", "-journal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Add,
    Change,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChangeEvent {
    /// Relative to the watched root, `/`-separated.
    pub path: String,
    pub kind: FileChangeKind,
}

/// What the watcher skips.
#[derive(Debug, Clone)]
pub struct WatchIgnores {
    dirs: Vec<String>,
    database_file: Option<String>,
}

impl Default for WatchIgnores {
    fn default() -> Self {
        Self {
            dirs: IGNORED_DIRS.iter().map(|s| s.to_string()).collect(),
            database_file: None,
        }
    }
}

impl WatchIgnores {
    pub fn new(database_file: Option<&str>, extra: &[String]) -> Self {
        let mut ignores = Self::default();
        ignores.dirs.extend(extra.iter().cloned());
        ignores.database_file = database_file
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        ignores
    }

    pub fn from_config(config: &WatcherConfig, database_file: &str) -> Self {
        Self::new(Some(database_file), &config.extra_ignores)
    }

    /// `rel` is relative to the watched root.
    pub fn is_ignored(&self, rel: &Path) -> bool {
        let names = rel.components().filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        });
        for name in names {
            if self.dirs.iter().any(|d| d == name) {
                return true;
            }
        }

        let (Some(db), Some(file)) = (
            self.database_file.as_deref(),
            rel.file_name().and_then(|n| n.to_str()),
        ) else {
            return false;
        };
        file == db
            || DB_SIDECARS
                .iter()
                .any(|suffix| file.strip_prefix(db) == Some(suffix))
    }
}

/// Keeps the OS watch alive until [`FsWatcher::close`] or drop.
pub struct FsWatcher {
    root: PathBuf,
    debouncer: Mutex<Option<Debouncer<RecommendedWatcher, RecommendedCache>>>,
    tx: Mutex<Option<broadcast::Sender<FileChangeEvent>>>,
}

impl FsWatcher {
    pub fn start(root: impl Into<PathBuf>, ignores: WatchIgnores) -> Result<Self> {
        Self::start_with_debounce(root, ignores, DEFAULT_DEBOUNCE)
    }

    pub fn start_with_debounce(
        root: impl Into<PathBuf>,
        ignores: WatchIgnores,
        debounce: Duration,
    ) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Events arrive with canonical paths on some platforms.
        let canonical = root.canonicalize()?;

        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        let sender = tx.clone();
        let base = canonical.clone();

        let mut debouncer = new_debouncer(
            debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for path in &event.paths {
                            let Some(kind) = classify(&event.kind, path) else {
                                continue;
                            };
                            let Some(rel) = relative_to(&base, path) else {
                                continue;
                            };
                            if rel.as_os_str().is_empty() || ignores.is_ignored(&rel) {
                                continue;
                            }
                            let change = FileChangeEvent {
                                path: to_slash(&rel),
                                kind,
                            };
                            debug!(path = %change.path, kind = ?change.kind, "file changed");
                            // No subscribers is fine.
                            let _ = sender.send(change);
                        }
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "file watcher error");
                    }
                },
            },
        )?;
        debouncer.watch(&canonical, RecursiveMode::Recursive)?;
        info!(root = %canonical.display(), "file watcher started");

        Ok(Self {
            root: canonical,
            debouncer: Mutex::new(Some(debouncer)),
            tx: Mutex::new(Some(tx)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A new listener. After [`close`](Self::close) the receiver reports
    /// `Closed` immediately.
    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Stop watching. Existing receivers drain what is buffered, then see
    /// `Closed`. Idempotent.
    pub fn close(&self) {
        let debouncer = self
            .debouncer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if debouncer.is_some() {
            info!(root = %self.root.display(), "file watcher closed");
        }
        // The debouncer owns the callback's sender clone; dropping both
        // closes the channel.
        drop(debouncer);
        drop(tx);
    }

    pub fn is_closed(&self) -> bool {
        self.debouncer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn classify(kind: &EventKind, path: &Path) -> Option<FileChangeKind> {
    use notify_debouncer_full::notify::event::ModifyKind;

    match kind {
        EventKind::Create(_) => Some(FileChangeKind::Add),
        // Renames report both ends; whichever side still exists was added.
        EventKind::Modify(ModifyKind::Name(_)) => Some(if path.exists() {
            FileChangeKind::Add
        } else {
            FileChangeKind::Remove
        }),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(FileChangeKind::Change),
        EventKind::Remove(_) => Some(FileChangeKind::Remove),
        _ => None,
    }
}

fn relative_to(base: &Path, path: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(Path::to_path_buf)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
