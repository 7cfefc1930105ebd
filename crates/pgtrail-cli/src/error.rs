//! Error types for the pgtrail CLI
//!
//! Messages are user-facing and say what to do next.

use pgtrail_server::AuditError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check pgtrail.toml or the PGTRAIL__* environment variables.")]
    Config(String),

    /// Caller supplied a value that cannot be used
    #[error("{0}")]
    Input(String),

    /// Could not reach the database
    #[error("Could not connect to the database: {0}. Check database.url or DATABASE_URL.")]
    Connection(String),

    /// The capture trigger refused a write
    #[error("Capture error: {0}")]
    Capture(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// JSON encoding failed
    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AuditError> for CliError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Config(message) => CliError::Config(message),
            AuditError::Input(message) | AuditError::NotFound(message) => CliError::Input(message),
            AuditError::Capture(message) => CliError::Capture(message),
            AuditError::Database(err) => CliError::Database(err.to_string()),
            AuditError::Io(err) => CliError::Io(err),
        }
    }
}
