use warren_common::{Classify, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Path escapes the sandbox. Never carries the requested path.
    #[error("path access denied")]
    PathDenied,

    #[error("tool \"{tool}\" is denied")]
    ToolDenied { tool: String },

    #[error("too many attempts, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("sandbox root unavailable: {source}")]
    RootUnavailable {
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    #[must_use]
    pub fn tool_denied(tool: impl Into<String>) -> Self {
        Self::ToolDenied { tool: tool.into() }
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::PathDenied => ErrorKind::SecurityDenied,
            Self::ToolDenied { .. } => ErrorKind::AccessDenied,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::RootUnavailable { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
