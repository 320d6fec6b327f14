use error_common::{codes::billing as codes, ErrorContext};
use serde::Serialize;
use thiserror::Error;

use crate::models::ChargeSource;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Capability unavailable: {0}")]
    DegradedCapability(String),

    #[error("Charge source {origin} lookup failed: {message}")]
    SourceLookup { origin: ChargeSource, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl BillingError {
    /// Stable error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Config(_) => codes::INVALID_CONFIGURATION,
            BillingError::Validation(_) => codes::INVALID_INPUT,
            BillingError::Conflict(_) => codes::STATE_CONFLICT,
            BillingError::DegradedCapability(_) => codes::CAPABILITY_UNAVAILABLE,
            BillingError::SourceLookup { .. } => codes::SOURCE_LOOKUP_FAILED,
            BillingError::Store(StoreError::NotFound(_)) => codes::RECORD_NOT_FOUND,
            BillingError::Store(StoreError::Stale(_)) => codes::STATE_CONFLICT,
            BillingError::Store(_) => codes::QUERY_FAILED,
        }
    }

    /// Whether the workflow may continue past this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BillingError::DegradedCapability(_) | BillingError::SourceLookup { .. }
        )
    }

    /// Log the error with its code through the shared reporter.
    pub fn report(&self, operation: &str, entity_id: impl ToString) {
        error_common::log_error(
            self,
            &ErrorContext::new()
                .with_code(self.code())
                .with_operation(operation)
                .with_entity_id(entity_id),
        );
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

/// A non-fatal problem absorbed by an operation and handed back to the
/// caller next to its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingWarning {
    SourceLookup { origin: ChargeSource, message: String },
    DegradedCapability { capability: String, message: String },
    IdentifierFallback { message: String },
    Rendering { message: String },
    BedAlreadyReleased { room_id: uuid::Uuid },
}
