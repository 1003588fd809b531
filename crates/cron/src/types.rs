//! Job documents as stored on disk and exchanged over the API.

use serde::{Deserialize, Deserializer, Serialize};

use crate::parse::parse_absolute_time_ms;

/// When a job fires. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CronSchedule {
    /// Cron expression, 5 to 7 fields, evaluated in `tz` (UTC when absent).
    Cron {
        cron: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
    /// Fires on the grid `createdAt + k * intervalMs`, k >= 1.
    Interval {
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
    },
    /// Fires once at `at` (epoch millis, or an RFC 3339 string on input).
    Once {
        #[serde(deserialize_with = "deserialize_at")]
        at: u64,
    },
}

impl CronSchedule {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Cron { .. } => "cron",
            Self::Interval { .. } => "interval",
            Self::Once { .. } => "once",
        }
    }
}

fn deserialize_at<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum At {
        Millis(u64),
        Text(String),
    }

    match At::deserialize(deserializer)? {
        At::Millis(ms) => Ok(ms),
        At::Text(s) => parse_absolute_time_ms(&s).map_err(serde::de::Error::custom),
    }
}

/// Optional channel delivery for a job's result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    /// Text handed to the agent when the job fires.
    pub message: String,
    pub schedule: CronSchedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<CronTarget>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Once jobs are removed instead of disabled after firing.
    #[serde(default)]
    pub delete_after_run: bool,
    /// Jobs created by the gateway itself (heartbeat). Hidden from counts.
    #[serde(default, skip_serializing_if = "is_false")]
    pub system: bool,
    /// Epoch millis. Anchors interval schedules.
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub state: CronJobState,
}

/// One execution of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronRunRecord {
    pub job_id: String,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Input for creating a job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobCreate {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub message: String,
    pub schedule: CronSchedule,
    #[serde(default)]
    pub target: Option<CronTarget>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub delete_after_run: bool,
    #[serde(default)]
    pub system: bool,
}

impl CronJobCreate {
    pub fn new(name: impl Into<String>, message: impl Into<String>, schedule: CronSchedule) -> Self {
        Self {
            id: None,
            name: name.into(),
            message: message.into(),
            schedule,
            target: None,
            enabled: true,
            delete_after_run: false,
            system: false,
        }
    }
}

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobPatch {
    pub name: Option<String>,
    pub message: Option<String>,
    pub schedule: Option<CronSchedule>,
    pub target: Option<CronTarget>,
    pub enabled: Option<bool>,
    pub delete_after_run: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronStatus {
    pub running: bool,
    pub job_count: usize,
    pub enabled_count: usize,
    pub next_run_at_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn is_false(b: &bool) -> bool {
    !*b
}
