//! CLI commands for plugin inspection.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Result,
    clap::Subcommand,
    warren_cron::InMemoryStore,
    warren_gateway::GatewayState,
    warren_plugins::{
        TrustDecision, TrustPolicy, loader::read_plugin_dir, scan::CodeScanner,
    },
};

use crate::Context;

#[derive(Subcommand)]
pub enum PluginAction {
    /// Load every plugin the gateway would load and list the result.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check a plugin directory: manifest, trust and code scan.
    Validate {
        /// Directory containing `warren.plugin.json`.
        dir: PathBuf,
    },
}

pub async fn handle_plugins(action: PluginAction, ctx: Context) -> Result<()> {
    match action {
        PluginAction::List { json } => list(ctx, json).await,
        PluginAction::Validate { dir } => validate(&ctx, &dir).await,
    }
}

async fn list(ctx: Context, json: bool) -> Result<()> {
    let state = GatewayState::builder(ctx.config, ctx.data_dir)
        .cron_store(Arc::new(InMemoryStore::new()))
        .build();
    let report = state.load_plugins().await;
    let plugins = state.registry.plugins();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "plugins": plugins,
                "skipped": report.skipped,
                "failed": report.failed,
            }))?
        );
        return Ok(());
    }

    if plugins.is_empty() {
        println!("No plugins loaded.");
    }
    for p in &plugins {
        let version = p.version.as_deref().unwrap_or("-");
        println!("  {} {version} [{}]", p.id, p.origin);
        if let Some(desc) = &p.description {
            println!("    {desc}");
        }
        let mut parts = Vec::new();
        if !p.tools.is_empty() {
            parts.push(format!("tools: {}", p.tools.join(", ")));
        }
        if !p.channels.is_empty() {
            parts.push(format!("channels: {}", p.channels.join(", ")));
        }
        if !p.hooks.is_empty() {
            parts.push(format!("hooks: {}", p.hooks.join(", ")));
        }
        if !parts.is_empty() {
            println!("    {}", parts.join("; "));
        }
    }
    for id in &report.skipped {
        println!("  {id} (disabled)");
    }
    for f in &report.failed {
        let who = f
            .plugin_id
            .clone()
            .or_else(|| f.dir.as_ref().map(|d| d.display().to_string()))
            .unwrap_or_else(|| "?".into());
        eprintln!("  {who} failed ({}): {}", f.kind, f.reason);
    }
    Ok(())
}

async fn validate(ctx: &Context, dir: &std::path::Path) -> Result<()> {
    let found = match read_plugin_dir(dir) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("invalid plugin at {}: {e}", dir.display());
            std::process::exit(1);
        },
    };
    let manifest = &found.manifest;
    println!("id:      {}", manifest.id);
    if let Some(name) = &manifest.name {
        println!("name:    {name}");
    }
    println!("origin:  {}", found.origin);
    println!("sha256:  {}", found.digest);

    let mut ok = true;
    let trust = TrustPolicy::from_config(&ctx.config.plugins.trust).evaluate(
        manifest,
        &found.origin,
        &found.digest,
    );
    match &trust {
        TrustDecision::Trusted => println!("trust:   trusted"),
        TrustDecision::Restricted { capabilities } => {
            let kinds: Vec<&str> = capabilities.iter().map(|k| k.as_str()).collect();
            println!("trust:   restricted to {}", kinds.join(", "));
        },
        TrustDecision::Denied { reason } => {
            println!("trust:   denied ({reason})");
            ok = false;
        },
    }

    let scan = &ctx.config.plugins.scan;
    if scan.enabled {
        let report = CodeScanner::new(&scan.allowed_hosts)?
            .with_max_file_bytes(scan.max_file_bytes)
            .scan(dir)
            .await?;
        println!(
            "scan:    {} file(s), {} finding(s)",
            report.files_scanned,
            report.findings.len()
        );
        for f in &report.findings {
            println!(
                "    {} {}:{}  {}",
                f.rule.as_str(),
                f.file.display(),
                f.line,
                f.snippet
            );
        }
        ok &= report.passed;
    } else {
        println!("scan:    disabled");
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
