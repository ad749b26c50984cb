use std::collections::BTreeMap;

use axum::http::{HeaderMap, StatusCode};
use sqlx::{error::DatabaseError, Error as SqlxError};
use tracing::error;

use crate::state_machine::TransitionError;
use crate::validation::FieldErrors;

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// Per-field messages for validation failures.
    pub fields: Option<BTreeMap<String, String>>,
    pub headers: Option<Box<HeaderMap>>,
}

pub type ApiResult<T> = std::result::Result<T, AppError>;

const DB_UNAVAILABLE_MESSAGE: &str = "database temporarily unavailable";

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            fields: None,
            headers: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", msg)
    }

    pub fn validation(fields: FieldErrors) -> Self {
        let mut err = Self::new(
            StatusCode::BAD_REQUEST,
            "validation_failed",
            "connection definition is invalid",
        );
        err.fields = Some(fields);
        err
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn concurrency_conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "concurrency_conflict", msg)
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::PRECONDITION_FAILED, "precondition_failed", msg)
    }

    pub fn onboarding_failed(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "onboarding_failed", msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
    }

    pub fn dispatch_timeout(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "dispatch_timeout", msg)
    }

    pub fn internal(msg: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(Box::new(headers));
        self
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::precondition_failed(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DbErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    Busy,
}

impl DbErrorKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            DbErrorKind::UniqueViolation => "unique_violation",
            DbErrorKind::ForeignKeyViolation => "foreign_key_violation",
            DbErrorKind::NotNullViolation => "not_null_violation",
            DbErrorKind::CheckViolation => "check_violation",
            DbErrorKind::Busy => "busy",
        }
    }
}

fn find_sqlx_error(err: &anyhow::Error) -> Option<&SqlxError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SqlxError>())
}

fn map_anyhow_error(err: &anyhow::Error) -> Option<AppError> {
    map_sqlx_error(find_sqlx_error(err)?)
}

fn map_sqlx_error(err: &SqlxError) -> Option<AppError> {
    match err {
        SqlxError::RowNotFound => Some(AppError::not_found("resource not found")),
        SqlxError::Database(db_err) => map_database_error(db_err.as_ref()),
        SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
            Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE))
        }
        _ => None,
    }
}

fn map_database_error(err: &dyn DatabaseError) -> Option<AppError> {
    let kind = classify_db_error(err.code().as_deref(), err.message())?;
    match kind {
        DbErrorKind::UniqueViolation => Some(AppError::concurrency_conflict(
            "resource was created concurrently",
        )),
        DbErrorKind::ForeignKeyViolation => Some(AppError::bad_request("invalid reference")),
        DbErrorKind::NotNullViolation => Some(AppError::bad_request("missing required field")),
        DbErrorKind::CheckViolation => Some(AppError::bad_request("invalid request")),
        DbErrorKind::Busy => Some(AppError::service_unavailable(DB_UNAVAILABLE_MESSAGE)),
    }
}

/// Classifies SQLite failures by extended result code, falling back to the
/// message text.
pub(crate) fn classify_db_error(code: Option<&str>, message: &str) -> Option<DbErrorKind> {
    let code = code.unwrap_or_default();
    let message = message.to_ascii_lowercase();

    if matches!(code, "2067" | "1555") || message.contains("unique constraint") {
        return Some(DbErrorKind::UniqueViolation);
    }

    if code == "787" || message.contains("foreign key constraint") {
        return Some(DbErrorKind::ForeignKeyViolation);
    }

    if code == "1299" || message.contains("not null constraint") {
        return Some(DbErrorKind::NotNullViolation);
    }

    if code == "275" || message.contains("check constraint") {
        return Some(DbErrorKind::CheckViolation);
    }

    if matches!(code, "5" | "6")
        || message.contains("database is locked")
        || message.contains("database is busy")
    {
        return Some(DbErrorKind::Busy);
    }

    None
}

pub(crate) fn db_error_kind(err: &anyhow::Error) -> Option<DbErrorKind> {
    match find_sqlx_error(err)? {
        SqlxError::Database(db_err) => classify_db_error(db_err.code().as_deref(), db_err.message()),
        _ => None,
    }
}

pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(db_error_kind(err), Some(DbErrorKind::UniqueViolation))
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(mapped) = map_anyhow_error(&err) {
            if mapped.status.is_server_error() {
                crate::metrics::record_internal_error(&err);
                error!(?err, "internal error");
            }
            return mapped;
        }

        crate::metrics::record_internal_error(&err);
        error!(?err, "internal error");
        AppError::internal("internal server error")
    }
}
