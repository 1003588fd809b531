//! Non-persistent store for tests and `cron.enabled = false` setups.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use crate::{
    Error, Result,
    store::CronStore,
    types::{CronJob, CronRunRecord},
};

/// Jobs keep insertion order so listings are stable.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: Mutex<Vec<CronJob>>,
    runs: Mutex<HashMap<String, Vec<CronRunRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CronStore for InMemoryStore {
    async fn load_jobs(&self) -> Result<Vec<CronJob>> {
        Ok(self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn save_job(&self, job: &CronJob) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(Error::job_not_found(id));
        }
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(())
    }

    async fn update_job(&self, job: &CronJob) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let existing = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| Error::job_not_found(&job.id))?;
        *existing = job.clone();
        Ok(())
    }

    async fn append_run(&self, job_id: &str, run: &CronRunRecord) -> Result<()> {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(job_id.to_string())
            .or_default()
            .push(run.clone());
        Ok(())
    }

    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<CronRunRecord>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let records = runs.get(job_id).map(Vec::as_slice).unwrap_or_default();
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{CronJobState, CronSchedule, RunStatus},
    };

    fn make_job(id: &str) -> CronJob {
        CronJob {
            id: id.into(),
            name: format!("job-{id}"),
            message: "hi".into(),
            schedule: CronSchedule::Interval { interval_ms: 1000 },
            target: None,
            enabled: true,
            delete_after_run: false,
            system: false,
            created_at: 0,
            updated_at: 0,
            state: CronJobState::default(),
        }
    }

    #[tokio::test]
    async fn crud_keeps_order() {
        let store = InMemoryStore::new();
        for id in ["b", "a", "c"] {
            store.save_job(&make_job(id)).await.unwrap();
        }
        let ids: Vec<String> = store
            .load_jobs()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, ["b", "a", "c"]);

        assert!(store.delete_job("nope").await.is_err());
        assert!(store.update_job(&make_job("nope")).await.is_err());
        store.delete_job("a").await.unwrap();
        assert_eq!(store.load_jobs().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn runs_return_most_recent() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            let run = CronRunRecord {
                job_id: "j1".into(),
                started_at_ms: i * 1000,
                finished_at_ms: i * 1000 + 500,
                status: RunStatus::Ok,
                error: None,
                duration_ms: 500,
                output: None,
            };
            store.append_run("j1", &run).await.unwrap();
        }
        let runs = store.get_runs("j1", 3).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].started_at_ms, 2000);
        assert!(store.get_runs("none", 10).await.unwrap().is_empty());
    }
}
