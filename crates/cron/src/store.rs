//! Persistence for jobs and their run history.

use async_trait::async_trait;

use crate::{
    Result,
    types::{CronJob, CronRunRecord},
};

#[async_trait]
pub trait CronStore: Send + Sync {
    async fn load_jobs(&self) -> Result<Vec<CronJob>>;
    /// Insert or replace by id.
    async fn save_job(&self, job: &CronJob) -> Result<()>;
    async fn delete_job(&self, id: &str) -> Result<()>;
    async fn update_job(&self, job: &CronJob) -> Result<()>;
    async fn append_run(&self, job_id: &str, run: &CronRunRecord) -> Result<()>;
    /// Most recent `limit` runs, oldest first.
    async fn get_runs(&self, job_id: &str, limit: usize) -> Result<Vec<CronRunRecord>>;
}
