//! Error types shared by all pgtrail crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared building blocks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("Invalid qualified name '{0}': expected 'table' or 'schema.table'")]
    InvalidQualifiedName(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CommonError {
    pub fn invalid_identifier(value: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            value: value.into(),
            reason,
        }
    }
}
