//! HTTP error body shared by every API handler.
//!
//! Each library error is classified into an [`ErrorKind`], which picks the
//! status code. The body is always `{"error": {"kind", "message"}}`.

use {
    axum::{
        Json,
        http::{HeaderValue, StatusCode, header},
        response::{IntoResponse, Response},
    },
    serde_json::json,
    tracing::error,
    warren_common::{Classify, ErrorKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    status: StatusCode,
    retry_after_ms: Option<u64>,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: status_for(kind),
            retry_after_ms: None,
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self {
            retry_after_ms: Some(retry_after_ms),
            ..Self::new(
                ErrorKind::RateLimited,
                format!("too many requests, retry in {retry_after_ms}ms"),
            )
        }
    }

    /// Same kind, different status. Used for 405 on known plugin paths.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Internal errors are logged in full; the client only sees the kind.
    fn classified(err: &(impl Classify + std::fmt::Display)) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            error!(error = %err, "internal error");
            return Self::new(kind, "internal error");
        }
        Self::new(kind, err.to_string())
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::SecurityDenied | ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::AdapterFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.kind.as_str(),
                "message": self.message,
            }
        }));
        let mut response = (self.status, body).into_response();
        if let Some(ms) = self.retry_after_ms {
            let secs = ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<warren_plugins::Error> for ApiError {
    fn from(err: warren_plugins::Error) -> Self {
        Self::classified(&err)
    }
}

impl From<warren_channels::Error> for ApiError {
    fn from(err: warren_channels::Error) -> Self {
        Self::classified(&err)
    }
}

impl From<warren_cron::Error> for ApiError {
    fn from(err: warren_cron::Error) -> Self {
        Self::classified(&err)
    }
}

impl From<warren_security::Error> for ApiError {
    fn from(err: warren_security::Error) -> Self {
        match err {
            warren_security::Error::RateLimited { retry_after_ms } => {
                Self::rate_limited(retry_after_ms)
            },
            other => Self::classified(&other),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
