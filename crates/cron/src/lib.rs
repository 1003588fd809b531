//! Job scheduling: cron expressions, fixed intervals and one-shot jobs.
//!
//! Jobs persist through a [`CronStore`] (`<data_dir>/cron/jobs.json` by
//! default). When a job fires, [`CronService`] hands it to a
//! [`JobDispatcher`], which talks to the agent and delivers results.

pub mod error;
pub mod heartbeat;
pub mod parse;
pub mod schedule;
pub mod service;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod system_events;
pub mod types;

pub use {
    error::{Error, Result},
    heartbeat::{HEARTBEAT_JOB_ID, Heartbeat},
    service::{CronFire, CronService, JobDispatcher, JobOutcome},
    store::CronStore,
    store_file::FileStore,
    store_memory::InMemoryStore,
    system_events::SystemEventsQueue,
    types::{
        CronJob, CronJobCreate, CronJobPatch, CronRunRecord, CronSchedule, CronStatus, CronTarget,
        RunStatus,
    },
};
