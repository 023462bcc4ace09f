//! Error taxonomy shared by the content store, the registries and the services.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use rusqlite::ErrorCode;
use serde_json::json;

/// Coarse classification used by the edge layer to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Unauthorized,
    BackendUnavailable,
    Canceled,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("content store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata store failure: {0}")]
    Database(rusqlite::Error),

    /// Backend state that is neither I/O nor SQL, e.g. a poisoned lock.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("operation canceled")]
    Canceled,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Validation(_) | StoreError::PayloadTooLarge(_) => ErrorKind::Validation,
            StoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            StoreError::Io(_) | StoreError::Database(_) | StoreError::Unavailable(_) => {
                ErrorKind::BackendUnavailable
            }
            StoreError::Canceled => ErrorKind::Canceled,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        StoreError::Unavailable(format!("{} lock poisoned", what))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("no matching row".to_string()),
            rusqlite::Error::SqliteFailure(ref inner, ref msg)
                if inner.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| "constraint violation".to_string()))
            }
            other => StoreError::Database(other),
        }
    }
}

/// Maps a blocking-pool failure (the closure panicked or the pool is gone).
impl From<actix_web::error::BlockingError> for StoreError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl ResponseError for StoreError {
    fn status_code(&self) -> StatusCode {
        if let StoreError::PayloadTooLarge(_) = self {
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Canceled => StatusCode::REQUEST_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
