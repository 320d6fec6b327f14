//! Common error handling utilities for the inpatient billing workspace
//!
//! This crate provides the error codes, error context and logging helpers
//! shared by every crate in the workspace, so that a validation failure in the
//! discharge workflow and a conflict in the NICU meter are reported with the
//! same structure.
//!
//! # Error Categories
//!
//! - **Validation**: missing references and negative amounts
//! - **Conflict**: lifecycle transitions attempted from the wrong state
//! - **Storage**: persistence failures and unprovisioned capabilities
//! - **Billing**: charge-source lookups and engine configuration
//!
//! # Example
//!
//! ```rust
//! use error_common::{codes, log_error, ErrorContext, RustCareError};
//!
//! let err = RustCareError::ValidationError("doctor reference is missing".into());
//! log_error(
//!     &err,
//!     &ErrorContext::new()
//!         .with_code(codes::billing::INVALID_INPUT)
//!         .with_operation("finalize"),
//! );
//! ```

pub mod types;
pub mod context;
pub mod codes;

pub use types::*;
pub use context::*;
