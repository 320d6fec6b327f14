use crate::context::ErrorContext;
use thiserror::Error;

/// Simplified error enum shared across the workspace crates
#[derive(Error, Debug)]
pub enum RustCareError {
    /// Database operation errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Business logic errors
    #[error("Business logic error: {0}")]
    BusinessError(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Wrapped external errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RustCare operations
pub type Result<T> = std::result::Result<T, RustCareError>;

/// Log a surfaced error together with its code and context.
pub fn log_error<E>(error: &E, context: &ErrorContext)
where
    E: std::error::Error + ?Sized,
{
    tracing::error!(
        error_code = context.code.as_deref().unwrap_or("UNCLASSIFIED"),
        operation = context.operation.as_deref().unwrap_or("unknown"),
        entity_id = context.entity_id.as_deref().unwrap_or("-"),
        extra = ?context.additional,
        error = %error,
        "RustCare error occurred"
    );
}
