//! Gateway: HTTP server, lifecycle and the glue between subsystems.
//!
//! Lifecycle:
//! 1. Load config and build [`GatewayState`]
//! 2. Best-effort git bootstrap of the sandbox root
//! 3. Load plugins, start channels, start cron, start the file watcher
//! 4. Fire `gateway_start` and serve HTTP
//! 5. On Ctrl-C fire `gateway_stop` and tear everything down in reverse
//!
//! Domain logic lives in the other crates. This one wires them together and
//! exposes them over HTTP.

pub mod agent;
pub mod bootstrap;
pub mod error;
pub mod server;
pub mod state;
pub mod watcher;

pub use {
    agent::{AgentBridge, EchoAgent},
    error::{ApiError, ApiResult},
    server::{AppState, build_gateway_app, run_gateway, start_gateway},
    state::{GatewayBuilder, GatewayState, StartupReport, cron_jobs_path},
    watcher::{FileChangeEvent, FileChangeKind, FsWatcher, WatchIgnores},
};
