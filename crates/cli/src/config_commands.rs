use {anyhow::Result, clap::Subcommand};

use warren_config::validate::{self, Severity};

use crate::Context;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration as TOML.
    Show,
    /// Print where config and data are read from.
    Paths,
}

pub fn handle_config(action: ConfigAction, ctx: &Context) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(ctx, verbose),
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(&ctx.config)?);
            Ok(())
        },
        ConfigAction::Paths => {
            match &ctx.config_path {
                Some(path) => println!("config:  {}", path.display()),
                None => println!("config:  (defaults)"),
            }
            println!("data:    {}", ctx.data_dir.display());
            println!(
                "sandbox: {}",
                ctx.config.sandbox.resolve_root(&ctx.data_dir).display()
            );
            println!(
                "cron:    {}",
                warren_gateway::cron_jobs_path(&ctx.config, &ctx.data_dir).display()
            );
            Ok(())
        },
    }
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(ctx: &Context, verbose: bool) -> Result<()> {
    let result = validate::validate(ctx.config_path.as_deref(), ctx.config_dir.as_deref());

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!(
                "  {BOLD}{color}{}{RESET} {}: {}",
                d.severity, d.path, d.message
            );
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
