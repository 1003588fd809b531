use {
    thiserror::Error,
    warren_common::{Classify, ErrorKind},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid cron expression '{expr}': {message}")]
    InvalidExpression { expr: String, message: String },

    #[error("unknown timezone: {timezone}")]
    UnknownTimezone { timezone: String },

    #[error("invalid job: {message}")]
    InvalidJob { message: String },

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("job already exists: {job_id}")]
    DuplicateJob { job_id: String },

    #[error("job is already running: {job_id}")]
    AlreadyRunning { job_id: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_job(message: impl Into<String>) -> Self {
        Self::InvalidJob {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_expression(expr: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidExpression {
            expr: expr.into(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    #[must_use]
    pub fn unknown_timezone(timezone: impl Into<String>) -> Self {
        Self::UnknownTimezone {
            timezone: timezone.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidExpression { .. }
            | Self::UnknownTimezone { .. }
            | Self::InvalidJob { .. } => ErrorKind::Validation,
            Self::JobNotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateJob { .. } | Self::AlreadyRunning { .. } => ErrorKind::Conflict,
            Self::Io(_) | Self::Json(_) | Self::External { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
