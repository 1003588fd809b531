//! Cron scheduler: timer loop, job execution, CRUD operations.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    futures::{FutureExt, future::join_all},
    serde::Serialize,
    tokio::{
        sync::{Mutex, Notify, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
    warren_common::time::now_ms,
};

use crate::{
    Error, Result,
    schedule::{compute_next_run, startup_next_run, validate_schedule},
    store::CronStore,
    types::{
        CronJob, CronJobCreate, CronJobPatch, CronJobState, CronRunRecord, CronSchedule,
        CronStatus, CronTarget, RunStatus,
    },
};

/// A job running longer than this is considered stuck and released.
const STUCK_THRESHOLD_MS: u64 = 2 * 60 * 60 * 1000;

/// Poll interval when no job is scheduled.
const IDLE_POLL_MS: u64 = 60_000;

const MAX_JOB_ID_LEN: usize = 64;

/// What a dispatcher receives when a job fires.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronFire {
    pub job_id: String,
    pub job_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<CronTarget>,
    pub system: bool,
    pub fired_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran. Carries the agent's output, if any.
    Completed(Option<String>),
    /// The job chose not to run this time.
    Skipped(String),
}

/// Delivers a fired job to the agent and, optionally, its channel target.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, fire: &CronFire) -> anyhow::Result<JobOutcome>;
}

pub struct CronService {
    store: Arc<dyn CronStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    jobs: RwLock<Vec<CronJob>>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: AtomicBool,
}

impl CronService {
    pub fn new(store: Arc<dyn CronStore>, dispatcher: Arc<dyn JobDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            store,
            dispatcher,
            jobs: RwLock::new(Vec::new()),
            timer_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Load jobs from the store and compute their first fire times.
    pub async fn load(&self) -> Result<()> {
        self.load_at(now_ms()).await
    }

    /// Like [`load`](Self::load) with an explicit clock.
    ///
    /// Once and interval jobs that missed their time while the scheduler was
    /// down become due immediately (one catch-up fire). Cron expressions skip
    /// to their next occurrence. Jobs whose schedule no longer parses are
    /// marked `error` and disabled.
    pub async fn load_at(&self, now: u64) -> Result<()> {
        let mut loaded = self.store.load_jobs().await?;
        let mut quarantined = Vec::new();
        for job in &mut loaded {
            job.state.running_at_ms = None;
            if !job.enabled {
                job.state.next_run_at_ms = None;
                continue;
            }
            match startup_next_run(&job.schedule, job.created_at, job.state.last_run_at_ms, now) {
                Ok(next) => job.state.next_run_at_ms = next,
                Err(e) => {
                    quarantine(job, &e);
                    quarantined.push(job.clone());
                },
            }
        }
        info!(count = loaded.len(), "loaded cron jobs");
        *self.jobs.write().await = loaded;
        self.persist_all(&quarantined).await;
        self.wake_notify.notify_one();
        Ok(())
    }

    /// Load jobs and spawn the timer loop. No-op when already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.load().await?;
        self.running.store(true, Ordering::SeqCst);

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.timer_loop().await;
        });
        *self.timer_handle.lock().await = Some(handle);
        info!("cron service started");
        Ok(())
    }

    /// Stop the timer loop. Jobs already dispatched finish on their own.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.wake_notify.notify_one();
        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.abort();
        }
        if was_running {
            info!("cron service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn add(&self, create: CronJobCreate) -> Result<CronJob> {
        let now = now_ms();
        let id = match create.id {
            Some(id) => {
                validate_job_id(&id)?;
                id
            },
            None => uuid::Uuid::new_v4().to_string(),
        };
        let mut job = CronJob {
            id,
            name: create.name.trim().to_string(),
            message: create.message,
            schedule: create.schedule,
            target: create.target,
            enabled: create.enabled,
            delete_after_run: create.delete_after_run,
            system: create.system,
            created_at: now,
            updated_at: now,
            state: CronJobState::default(),
        };
        validate_job(&job)?;
        if job.enabled {
            job.state.next_run_at_ms = scheduled_next(&job, now)?;
        }

        {
            let mut jobs = self.jobs.write().await;
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(Error::DuplicateJob { job_id: job.id });
            }
            self.store.save_job(&job).await?;
            jobs.push(job.clone());
        }

        self.wake_notify.notify_one();
        info!(job = %job.id, name = %job.name, schedule = job.schedule.type_name(), "cron job added");
        Ok(job)
    }

    pub async fn update(&self, id: &str, patch: CronJobPatch) -> Result<CronJob> {
        let now = now_ms();
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::job_not_found(id))?;

        let mut updated = job.clone();
        if let Some(name) = patch.name {
            updated.name = name.trim().to_string();
        }
        if let Some(message) = patch.message {
            updated.message = message;
        }
        if let Some(schedule) = patch.schedule {
            updated.schedule = schedule;
            updated.state.last_run_at_ms = None;
        }
        if let Some(target) = patch.target {
            updated.target = Some(target);
        }
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
        }
        if let Some(delete_after_run) = patch.delete_after_run {
            updated.delete_after_run = delete_after_run;
        }
        updated.updated_at = now;
        validate_job(&updated)?;
        updated.state.next_run_at_ms = if updated.enabled {
            scheduled_next(&updated, now)?
        } else {
            None
        };

        self.store.update_job(&updated).await?;
        *job = updated.clone();
        drop(jobs);

        self.wake_notify.notify_one();
        info!(job = %id, "cron job updated");
        Ok(updated)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if !jobs.iter().any(|j| j.id == id) {
            return Err(Error::job_not_found(id));
        }
        self.store.delete_job(id).await?;
        jobs.retain(|j| j.id != id);
        drop(jobs);
        info!(job = %id, "cron job removed");
        Ok(())
    }

    pub async fn list(&self) -> Vec<CronJob> {
        self.jobs.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<CronJob> {
        self.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    /// Fire a job immediately, enabled or not, and wait for it.
    pub async fn run_now(&self, id: &str) -> Result<CronRunRecord> {
        let now = now_ms();
        let job = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| Error::job_not_found(id))?;
            if job.state.running_at_ms.is_some() {
                return Err(Error::AlreadyRunning {
                    job_id: id.to_string(),
                });
            }
            validate_schedule(&job.schedule)?;
            job.state.running_at_ms = Some(now);
            job.clone()
        };
        Ok(self.execute_job(job, now).await)
    }

    pub async fn runs(&self, job_id: &str, limit: usize) -> Result<Vec<CronRunRecord>> {
        self.store.get_runs(job_id, limit).await
    }

    /// Counts exclude system jobs.
    pub async fn status(&self) -> CronStatus {
        let jobs = self.jobs.read().await;
        let user_jobs = jobs.iter().filter(|j| !j.system);
        let mut job_count = 0;
        let mut enabled_count = 0;
        let mut next_run_at_ms: Option<u64> = None;
        for job in user_jobs {
            job_count += 1;
            if job.enabled {
                enabled_count += 1;
            }
            if let Some(next) = job.state.next_run_at_ms {
                next_run_at_ms = Some(next_run_at_ms.map_or(next, |n| n.min(next)));
            }
        }
        CronStatus {
            running: self.is_running(),
            job_count,
            enabled_count,
            next_run_at_ms,
        }
    }

    /// Fire every job due at `now` and wait for all of them.
    pub async fn tick_at(&self, now: u64) -> Vec<CronRunRecord> {
        self.clear_stuck_jobs(now).await;
        let due = self.collect_due(now).await;
        join_all(due.into_iter().map(|job| self.execute_job(job, now))).await
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn timer_loop(self: &Arc<Self>) {
        while self.is_running() {
            let sleep_ms = self.ms_until_next_wake().await;
            if sleep_ms > 0 {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                    () = notify.notified() => {
                        debug!("cron timer woken");
                        continue;
                    },
                }
            }
            if !self.is_running() {
                break;
            }

            let now = now_ms();
            self.clear_stuck_jobs(now).await;
            for job in self.collect_due(now).await {
                let svc = Arc::clone(self);
                tokio::spawn(async move {
                    svc.execute_job(job, now).await;
                });
            }
        }
    }

    async fn ms_until_next_wake(&self) -> u64 {
        let now = now_ms();
        self.jobs
            .read()
            .await
            .iter()
            .filter(|j| j.enabled && j.state.running_at_ms.is_none())
            .filter_map(|j| j.state.next_run_at_ms)
            .map(|t| t.saturating_sub(now))
            .min()
            .unwrap_or(IDLE_POLL_MS)
    }

    /// Mark due jobs as running under the write lock so the next tick cannot
    /// pick them up again.
    async fn collect_due(&self, now: u64) -> Vec<CronJob> {
        let mut due = Vec::new();
        let mut quarantined = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            for job in jobs.iter_mut() {
                let is_due = job.enabled
                    && job.state.running_at_ms.is_none()
                    && job.state.next_run_at_ms.is_some_and(|t| t <= now);
                if !is_due {
                    continue;
                }
                if let Err(e) = validate_schedule(&job.schedule) {
                    quarantine(job, &e);
                    quarantined.push(job.clone());
                    continue;
                }
                job.state.running_at_ms = Some(now);
                due.push(job.clone());
            }
        }
        self.persist_all(&quarantined).await;
        due
    }

    async fn execute_job(&self, job: CronJob, fired_at: u64) -> CronRunRecord {
        info!(job = %job.id, name = %job.name, "cron job firing");
        let fire = CronFire {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            message: job.message.clone(),
            target: job.target.clone(),
            system: job.system,
            fired_at_ms: fired_at,
        };

        let started = Instant::now();
        let result = AssertUnwindSafe(self.dispatcher.dispatch(&fire))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, error, output) = match result {
            Ok(Ok(JobOutcome::Completed(output))) => (RunStatus::Ok, None, output),
            Ok(Ok(JobOutcome::Skipped(reason))) => (RunStatus::Skipped, None, Some(reason)),
            Ok(Err(e)) => (RunStatus::Error, Some(format!("{e:#}")), None),
            Err(_) => (RunStatus::Error, Some("dispatcher panicked".to_string()), None),
        };
        if let Some(error) = &error {
            warn!(job = %job.id, error = %error, "cron job failed");
        }

        let run = CronRunRecord {
            job_id: job.id.clone(),
            started_at_ms: fired_at,
            finished_at_ms: fired_at + duration_ms,
            status,
            error: error.clone(),
            duration_ms,
            output,
        };
        if let Err(e) = self.store.append_run(&job.id, &run).await {
            warn!(job = %job.id, error = %e, "failed to record cron run");
        }

        let next = match &job.schedule {
            CronSchedule::Once { .. } => Ok(None),
            schedule => compute_next_run(schedule, job.created_at, fired_at),
        };
        self.finish_job(&job.id, &run, next).await;

        info!(job = %job.id, status = ?status, duration_ms, "cron job finished");
        run
    }

    /// Record the run on the job and schedule (or retire) it.
    async fn finish_job(&self, id: &str, run: &CronRunRecord, next: Result<Option<u64>>) {
        let mut jobs = self.jobs.write().await;
        let Some(pos) = jobs.iter().position(|j| j.id == id) else {
            debug!(job = %id, "job removed while running");
            return;
        };
        let job = &mut jobs[pos];
        job.state.running_at_ms = None;
        job.state.last_run_at_ms = Some(run.started_at_ms);
        job.state.last_status = Some(run.status);
        job.state.last_error = run.error.clone();
        job.state.last_duration_ms = Some(run.duration_ms);

        let delete = match next {
            Ok(Some(next)) => {
                job.state.next_run_at_ms = job.enabled.then_some(next);
                false
            },
            Ok(None) => {
                job.state.next_run_at_ms = None;
                job.enabled = false;
                job.delete_after_run
            },
            Err(e) => {
                quarantine(job, &e);
                false
            },
        };

        if delete {
            jobs.remove(pos);
            drop(jobs);
            if let Err(e) = self.store.delete_job(id).await {
                warn!(job = %id, error = %e, "failed to delete completed job");
            }
            info!(job = %id, "one-shot job deleted after run");
        } else {
            let snapshot = job.clone();
            drop(jobs);
            self.persist_all(std::slice::from_ref(&snapshot)).await;
        }
        self.wake_notify.notify_one();
    }

    async fn clear_stuck_jobs(&self, now: u64) {
        let mut jobs = self.jobs.write().await;
        for job in jobs.iter_mut() {
            if let Some(running_at) = job.state.running_at_ms
                && now.saturating_sub(running_at) > STUCK_THRESHOLD_MS
            {
                warn!(job = %job.id, "clearing stuck cron job");
                job.state.running_at_ms = None;
                job.state.last_status = Some(RunStatus::Error);
                job.state.last_error = Some("stuck: exceeded 2h timeout".into());
            }
        }
    }

    async fn persist_all(&self, jobs: &[CronJob]) {
        for job in jobs {
            if let Err(e) = self.store.update_job(job).await {
                warn!(job = %job.id, error = %e, "failed to persist cron job");
            }
        }
    }
}

/// Mark a job whose schedule cannot be evaluated.
fn quarantine(job: &mut CronJob, error: &Error) {
    warn!(job = %job.id, error = %error, "disabling cron job with invalid schedule");
    job.enabled = false;
    job.state.next_run_at_ms = None;
    job.state.running_at_ms = None;
    job.state.last_status = Some(RunStatus::Error);
    job.state.last_error = Some(error.to_string());
}

/// Next fire time for a freshly added or edited job.
fn scheduled_next(job: &CronJob, now: u64) -> Result<Option<u64>> {
    match job.schedule {
        CronSchedule::Once { at } => Ok(job.state.last_run_at_ms.is_none().then_some(at)),
        _ => compute_next_run(&job.schedule, job.created_at, now),
    }
}

fn validate_job(job: &CronJob) -> Result<()> {
    if job.name.is_empty() {
        return Err(Error::invalid_job("name must not be empty"));
    }
    if !job.system && job.message.trim().is_empty() {
        return Err(Error::invalid_job("message must not be empty"));
    }
    if let Some(target) = &job.target
        && target.chat_id.is_some()
        && target.channel.is_none()
    {
        return Err(Error::invalid_job("target.chatId requires target.channel"));
    }
    validate_schedule(&job.schedule)
}

fn validate_job_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_job(format!(
            "job id must be 1-{MAX_JOB_ID_LEN} characters of [A-Za-z0-9_-]"
        )))
    }
}
