//! CLI commands for scheduled jobs. They edit the same job file the gateway
//! reads, so changes take effect on its next start.

use std::sync::Arc;

use {
    anyhow::Result,
    clap::{ArgGroup, Subcommand},
    warren_cron::{
        CronJob, CronJobCreate, CronSchedule, CronService, CronTarget, FileStore,
        parse::{parse_absolute_time_ms, parse_duration_ms},
    },
    warren_gateway::{GatewayState, cron_jobs_path},
};

use crate::Context;

#[derive(Subcommand)]
pub enum CronAction {
    /// List jobs.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Add a job. Exactly one of --cron, --every or --at is required.
    #[command(group(ArgGroup::new("when").required(true).args(["cron", "every", "at"])))]
    Add {
        #[arg(long)]
        name: String,
        /// Text handed to the agent when the job fires.
        #[arg(long)]
        message: String,
        #[arg(long)]
        id: Option<String>,
        /// Cron expression, 5 to 7 fields.
        #[arg(long)]
        cron: Option<String>,
        /// Timezone for --cron, e.g. Europe/Paris.
        #[arg(long, requires = "cron")]
        tz: Option<String>,
        /// Fixed interval such as 30s, 5m, 2h or 1d.
        #[arg(long)]
        every: Option<String>,
        /// One-shot time, RFC 3339 or epoch milliseconds.
        #[arg(long)]
        at: Option<String>,
        /// Deliver the result to this channel.
        #[arg(long, requires = "chat_id")]
        channel: Option<String>,
        #[arg(long, requires = "channel")]
        chat_id: Option<String>,
        /// Create the job disabled.
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a job.
    Remove { id: String },
    /// Show recent runs of a job.
    Runs {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

pub async fn handle_cron(action: CronAction, ctx: Context) -> Result<()> {
    let path = cron_jobs_path(&ctx.config, &ctx.data_dir);
    let state = GatewayState::builder(ctx.config, ctx.data_dir)
        .cron_store(Arc::new(FileStore::at(path)))
        .build();
    let cron = &state.cron;
    cron.load().await?;

    match action {
        CronAction::List { json } => list(cron, json).await,
        CronAction::Add {
            name,
            message,
            id,
            cron: expr,
            tz,
            every,
            at,
            channel,
            chat_id,
            disabled,
        } => {
            let schedule = match (expr, every, at) {
                (Some(cron), ..) => CronSchedule::Cron { cron, tz },
                (None, Some(every), _) => CronSchedule::Interval {
                    interval_ms: parse_duration_ms(&every)?,
                },
                (None, None, Some(at)) => CronSchedule::Once {
                    at: parse_absolute_time_ms(&at)?,
                },
                (None, None, None) => anyhow::bail!("one of --cron, --every or --at is required"),
            };
            let target = channel.map(|channel| CronTarget {
                channel: Some(channel),
                chat_id,
            });
            let job = cron
                .add(CronJobCreate {
                    id,
                    name,
                    message,
                    schedule,
                    target,
                    enabled: !disabled,
                    delete_after_run: false,
                    system: false,
                })
                .await?;
            println!("Added job '{}' ({})", job.name, job.id);
            if let Some(next) = job.state.next_run_at_ms {
                println!("Next run: {}", format_ms(next));
            }
            Ok(())
        },
        CronAction::Remove { id } => {
            cron.remove(&id).await?;
            println!("Removed job '{id}'.");
            Ok(())
        },
        CronAction::Runs { id, limit } => {
            if cron.get(&id).await.is_none() {
                anyhow::bail!("job not found: {id}");
            }
            for run in cron.runs(&id, limit).await? {
                let status = serde_json::to_value(run.status)?;
                let status = status.as_str().unwrap_or("?").to_string();
                print!(
                    "  {} {status} {}ms",
                    format_ms(run.started_at_ms),
                    run.duration_ms
                );
                match run.error {
                    Some(err) => println!("  {err}"),
                    None => println!(),
                }
            }
            Ok(())
        },
    }
}

async fn list(cron: &CronService, json: bool) -> Result<()> {
    let jobs = cron.list().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }
    if jobs.is_empty() {
        println!("No jobs.");
    }
    for job in &jobs {
        println!("  {}", describe(job));
    }
    Ok(())
}

fn describe(job: &CronJob) -> String {
    let when = match &job.schedule {
        CronSchedule::Cron { cron, tz: Some(tz) } => format!("cron '{cron}' {tz}"),
        CronSchedule::Cron { cron, tz: None } => format!("cron '{cron}'"),
        CronSchedule::Interval { interval_ms } => format!("every {interval_ms}ms"),
        CronSchedule::Once { at } => format!("at {}", format_ms(*at)),
    };
    let mut line = format!("{} {} [{when}]", job.id, job.name);
    if !job.enabled {
        line.push_str(" (disabled)");
    }
    if job.system {
        line.push_str(" (system)");
    }
    if let Some(next) = job.state.next_run_at_ms {
        line.push_str(&format!(" next {}", format_ms(next)));
    }
    line
}

fn format_ms(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}
