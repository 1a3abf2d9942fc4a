//! Error types for the Docktor client, the deployment job and project saves.
//!
//! Errors are classified by where they surface:
//! - `DocktorError`: per-project failures inside a pass, never fatal to it
//! - `JobError`: the whole pass could not run
//! - `ScheduleError`: the recurrence cannot be evaluated
//! - `ValidationError`: a project save was refused
//! - `ApiError`: everything above, mapped to an HTTP status

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;

/// Failures talking to Docktor.
#[derive(Debug, Error)]
pub enum DocktorError {
    #[error("Docktor configuration error: {0}")]
    Configuration(String),

    #[error("Failed to authenticate to Docktor: {message}")]
    Authentication { message: String, transport: bool },

    #[error("Invalid Docktor group URL: {0}")]
    Parse(String),

    #[error("Failed to get group from Docktor: {message}")]
    Fetch { message: String, transport: bool },
}

impl DocktorError {
    pub(crate) fn auth(message: impl Into<String>) -> Self {
        DocktorError::Authentication {
            message: message.into(),
            transport: false,
        }
    }

    pub(crate) fn fetch(message: impl Into<String>) -> Self {
        DocktorError::Fetch {
            message: message.into(),
            transport: false,
        }
    }

    /// Connection failures, timeouts and 5xx answers.
    pub(crate) fn from_transport(err: reqwest::Error, during_login: bool) -> Self {
        let message = err.to_string();
        if during_login {
            DocktorError::Authentication {
                message,
                transport: true,
            }
        } else {
            DocktorError::Fetch {
                message,
                transport: true,
            }
        }
    }

    /// Returns true if the same call may succeed on the next pass.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DocktorError::Authentication { transport: true, .. }
                | DocktorError::Fetch { transport: true, .. }
        )
    }
}

/// A deployment pass that could not run at all.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to load {what}: {source}")]
    Store {
        what: &'static str,
        #[source]
        source: DbError,
    },

    #[error("A deployment indicators pass is already running")]
    AlreadyRunning,

    #[error("Deployment job is not configured: {0}")]
    NotConfigured(String),
}

/// Invalid `schedule` configuration. The scheduler does not start.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid recurrence '{expr}': {reason}")]
    Recurrence { expr: String, reason: String },

    #[error("Invalid timezone: {0}")]
    Timezone(String),
}

/// Refused project save.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] DbError),
}

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or unknown API token")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            DbError::VersionConflict(name) => {
                ApiError::Conflict(format!("Project {} was modified concurrently", name))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::AlreadyRunning => ApiError::Conflict(err.to_string()),
            JobError::Store { .. } => ApiError::Internal(err.to_string()),
            JobError::NotConfigured(_) => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Invalid(msg) => ApiError::BadRequest(msg),
            ValidationError::Forbidden(msg) => ApiError::Forbidden(msg),
            ValidationError::NotFound(msg) => ApiError::NotFound(msg),
            ValidationError::Store(db) => db.into(),
        }
    }
}
