use warren_common::{Classify, ErrorKind};

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// No adapter or running channel with this id.
    #[error("unknown channel: {channel}")]
    NotFound { channel: String },

    /// The channel exists but is not running.
    #[error("channel unavailable: {message}")]
    Unavailable { message: String },

    /// The adapter itself reported a failure.
    #[error("channel {channel} adapter failed: {message}")]
    AdapterFailure { channel: String, message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn not_found(channel: impl std::fmt::Display) -> Self {
        Self::NotFound {
            channel: channel.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    /// Wrap an adapter error, keeping its full context chain in the message.
    #[must_use]
    pub fn adapter(channel: impl std::fmt::Display, source: &anyhow::Error) -> Self {
        Self::AdapterFailure {
            channel: channel.to_string(),
            message: format!("{source:#}"),
        }
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unavailable { .. } => ErrorKind::Conflict,
            Self::AdapterFailure { .. } => ErrorKind::AdapterFailure,
        }
    }
}
