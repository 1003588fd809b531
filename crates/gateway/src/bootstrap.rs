//! Best-effort git repository for the sandbox root.
//!
//! The agent's home is versioned so its edits can be reviewed and reverted.
//! Nothing here is fatal: a failure is logged and the gateway carries on.

use std::path::Path;

use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitBootstrap {
    /// A repository was already there.
    Existing,
    Created,
    Failed,
}

/// Ensure `root` exists and is a git repository.
pub fn ensure_git_repo(root: &Path, database_file: &str) -> GitBootstrap {
    if let Err(e) = std::fs::create_dir_all(root) {
        warn!(root = %root.display(), error = %e, "could not create sandbox root");
        return GitBootstrap::Failed;
    }
    if gix::open(root).is_ok() {
        debug!(root = %root.display(), "sandbox root already a git repository");
        return GitBootstrap::Existing;
    }
    match gix::init(root) {
        Ok(_) => {
            write_gitignore(root, database_file);
            info!(root = %root.display(), "initialized git repository in sandbox root");
            GitBootstrap::Created
        },
        Err(e) => {
            warn!(root = %root.display(), error = %e, "git init failed, continuing without");
            GitBootstrap::Failed
        },
    }
}

/// Keep the live database and dependency caches out of history.
fn write_gitignore(root: &Path, database_file: &str) {
    let path = root.join(".gitignore");
    if path.exists() {
        return;
    }
    let mut body = String::from("node_modules/\ntarget/\n");
    if !database_file.is_empty() {
        body.push_str(&format!("{database_file}\n{database_file}-*\n"));
    }
    if let Err(e) = std::fs::write(&path, body) {
        warn!(path = %path.display(), error = %e, "could not write .gitignore");
    }
}
