use std::path::PathBuf;

use warren_common::{Classify, ErrorKind};

use crate::manifest::ManifestError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("invalid {kind} \"{key}\": {message}")]
    InvalidCapability {
        kind: &'static str,
        key: String,
        message: String,
    },

    /// A key that is already registered.
    #[error("{kind} \"{key}\" is already registered")]
    Conflict { kind: &'static str, key: String },

    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("plugin {plugin_id} denied: {reason}")]
    SecurityDenied { plugin_id: String, reason: String },

    #[error("no entry point compiled in for plugin {plugin_id}")]
    MissingEntryPoint { plugin_id: String },

    #[error("plugin {plugin_id} failed to register: {message}")]
    RegisterFailed { plugin_id: String, message: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("code scan failed: {message}")]
    Scan { message: String },
}

impl Error {
    #[must_use]
    pub fn conflict(kind: &'static str, key: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn denied(plugin_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SecurityDenied {
            plugin_id: plugin_id.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn scan(message: impl std::fmt::Display) -> Self {
        Self::Scan {
            message: message.to_string(),
        }
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Manifest(_)
            | Self::InvalidCapability { .. }
            | Self::MissingEntryPoint { .. }
            | Self::Json(_) => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::SecurityDenied { .. } => ErrorKind::SecurityDenied,
            Self::RegisterFailed { .. } | Self::Io { .. } | Self::Scan { .. } => {
                ErrorKind::Internal
            },
        }
    }
}
