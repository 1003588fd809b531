//! JSON file-backed cron store with atomic writes.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::{fs, io::AsyncWriteExt, sync::Mutex},
    tracing::warn,
};

use crate::{
    Error, Result,
    store::CronStore,
    types::{CronJob, CronRunRecord},
};

/// Jobs in a single JSON file, runs as JSONL per job.
pub struct FileStore {
    jobs_path: PathBuf,
    runs_dir: PathBuf,
    /// Serializes read-modify-write cycles on the jobs file.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(jobs_path: PathBuf, runs_dir: PathBuf) -> Self {
        Self {
            jobs_path,
            runs_dir,
            write_lock: Mutex::new(()),
        }
    }

    /// `<dir>/jobs.json` and `<dir>/runs/`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("jobs.json"), dir.join("runs"))
    }

    /// Runs live next to the jobs file.
    pub fn at(jobs_path: PathBuf) -> Self {
        let runs_dir = jobs_path
            .parent()
            .map(|p| p.join("runs"))
            .unwrap_or_else(|| PathBuf::from("runs"));
        Self::new(jobs_path, runs_dir)
    }

    pub fn jobs_path(&self) -> &Path {
        &self.jobs_path
    }

    async fn ensure_dirs(&self) -> Result<()> {
        if let Some(parent) = self.jobs_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::create_dir_all(&self.runs_dir).await?;
        Ok(())
    }

    async fn read_jobs(&self) -> Result<Vec<CronJob>> {
        if !fs::try_exists(&self.jobs_path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.jobs_path).await?;
        let entries: Vec<Value> = serde_json::from_str(&data)
            .map_err(|e| Error::external(format!("parse {}", self.jobs_path.display()), e))?;

        let mut jobs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<CronJob>(entry) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(
                    path = %self.jobs_path.display(),
                    index,
                    error = %e,
                    "skipping unreadable cron job"
                ),
            }
        }
        Ok(jobs)
    }

    /// Write to temp, keep the previous file as `.bak`, rename over target.
    async fn atomic_write_jobs(&self, jobs: &[CronJob]) -> Result<()> {
        self.ensure_dirs().await?;
        let json = serde_json::to_string_pretty(jobs)?;
        let tmp = self.jobs_path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;

        if fs::try_exists(&self.jobs_path).await.unwrap_or(false) {
            let bak = self.jobs_path.with_extension("json.bak");
            if let Err(e) = fs::copy(&self.jobs_path, &bak).await {
                warn!(error = %e, "failed to back up cron jobs file");
            }
        }

        fs::rename(&tmp, &self.jobs_path).await?;
        Ok(())
    }

    fn runs_path(&self, job_id: &str) -> PathBuf {
        self.runs_dir.join(format!("{job_id}.jsonl"))
    }
}

#[async_trait]
impl CronStore for FileStore {
    async fn load_jobs(&self) -> Result<Vec<CronJob>> {
        self.read_jobs().await
    }

    async fn save_job(&self, job: &CronJob) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut jobs = self.read_jobs().await?;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        self.atomic_write_jobs(&jobs).await
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut jobs = self.read_jobs().await?;
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(Error::job_not_found(id));
        }
        self.atomic_write_jobs(&jobs).await?;

        let runs = self.runs_path(id);
        if fs::try_exists(&runs).await.unwrap_or(false)
            && let Err(e) = fs::remove_file(&runs).await
        {
            warn!(job = %id, error = %e, "failed to remove run history");
        }
        Ok(())
    }

    async fn update_job(&self, job: &CronJob) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut jobs = self.read_jobs().await?;
        let existing = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| Error::job_not_found(&job.id))?;
        *existing = job.clone();
        self.atomic_write_jobs(&jobs).await
    }

    async fn append_run(&self, job_id: &str, run: &CronRunRecord) -> Result<()> {
        self.ensure_dirs().await?;
        let mut line = serde_json::to_string(run)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.runs_path(job_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<CronRunRecord>> {
        let path = self.runs_path(job_id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path).await?;
        let mut all: Vec<CronRunRecord> = data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        let start = all.len().saturating_sub(limit);
        Ok(all.split_off(start))
    }
}
