mod config_commands;
mod cron_commands;
mod plugin_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    warren_config::WarrenConfig,
};

#[derive(Parser)]
#[command(name = "warren", about = "Warren: plugin, channel and scheduling gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Custom config directory (overrides default ~/.config/warren/).
    #[arg(long, global = true, env = "WARREN_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "WARREN_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Plugin inspection and validation.
    Plugins {
        #[command(subcommand)]
        action: plugin_commands::PluginAction,
    },
    /// Scheduled job management.
    Cron {
        #[command(subcommand)]
        action: cron_commands::CronAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Resolved config plus the directories every command works against.
pub(crate) struct Context {
    pub config: WarrenConfig,
    pub config_path: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
}

impl Context {
    fn load(cli: &Cli) -> Self {
        let (mut config, config_path) = warren_config::discover_and_load(cli.config_dir.as_deref());
        if let Some(bind) = &cli.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        Self {
            config,
            config_path,
            config_dir: cli.config_dir.clone(),
            data_dir: warren_config::data_dir(cli.data_dir.as_deref()),
        }
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let ctx = Context::load(&cli);

    match cli.command {
        None | Some(Commands::Gateway) => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                config = ?ctx.config_path,
                data_dir = %ctx.data_dir.display(),
                "warren starting"
            );
            warren_gateway::start_gateway(ctx.config, ctx.data_dir).await
        },
        Some(Commands::Plugins { action }) => plugin_commands::handle_plugins(action, ctx).await,
        Some(Commands::Cron { action }) => cron_commands::handle_cron(action, ctx).await,
        Some(Commands::Config { action }) => config_commands::handle_config(action, &ctx),
    }
}
