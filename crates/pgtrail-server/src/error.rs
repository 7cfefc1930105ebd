//! Error types for the audit core

use crate::api::response::ErrorResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pgtrail_common::CommonError;
use thiserror::Error;

/// SQLSTATE raised by the capture function (`triggered_action_exception`).
pub const CAPTURE_SQLSTATE: &str = "09000";

/// Result type alias for audit operations
pub type AuditResult<T> = std::result::Result<T, AuditError>;

/// Errors surfaced by the audit core
#[derive(Error, Debug)]
pub enum AuditError {
    /// Missing registration, mismatched schemas, bad settings. Raised before any mutation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied a table, attribute or filter value that cannot be resolved
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The capture trigger refused the write; the enclosing transaction was rolled back
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn not_found(resource: &str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found", resource, identifier))
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            if db.code().as_deref() == Some(CAPTURE_SQLSTATE) {
                return Self::Capture(db.message().to_string());
            }
        }
        Self::Database(err)
    }
}

impl From<CommonError> for AuditError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Config(message) => Self::Config(message),
            other => Self::Input(other.to_string()),
        }
    }
}

impl IntoResponse for AuditError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuditError::Input(ref message) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message.clone())
            },
            AuditError::NotFound(ref message) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", message.clone())
            },
            AuditError::Config(ref message) => {
                tracing::error!(error = %message, "Configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server configuration error".to_string(),
                )
            },
            AuditError::Capture(ref message) => {
                tracing::error!(error = %message, "Capture error");
                (StatusCode::INTERNAL_SERVER_ERROR, "CAPTURE_ERROR", message.clone())
            },
            AuditError::Database(ref e) => {
                tracing::error!(error = ?e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "A database error occurred".to_string(),
                )
            },
            AuditError::Io(ref e) => {
                tracing::error!(error = ?e, "IO error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An IO error occurred".to_string(),
                )
            },
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_errors_are_input_errors() {
        let err: AuditError = pgtrail_common::Ident::new("Bad Name").unwrap_err().into();
        assert!(matches!(err, AuditError::Input(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AuditError::input("bad table").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuditError::not_found("Version", 42).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AuditError::config("no entities").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = AuditError::not_found("Entity", "post");
        assert_eq!(err.to_string(), "Not found: Entity 'post' not found");
    }
}
