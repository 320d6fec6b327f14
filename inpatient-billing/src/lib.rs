//! Inpatient discharge billing and NICU metering
//!
//! Provides:
//! - Hourly NICU observation metering with live estimates
//! - Charge collection from lab, treatment and NICU subsystems
//! - Discount, settlement and room-day arithmetic
//! - Discharge finalization with identifier fallback and deferred persistence
//! - Bed occupancy tracking
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use inpatient_billing::{BillingConfig, DischargeFinalizer, DischargeInputs, InMemoryHospital};
//!
//! # async fn run(admission_id: uuid::Uuid) -> inpatient_billing::BillingResult<()> {
//! let hospital = InMemoryHospital::new();
//! let finalizer = DischargeFinalizer::new(hospital.store(), Arc::new(BillingConfig::from_env()?));
//!
//! let outcome = finalizer.finalize(admission_id, DischargeInputs::new(Utc::now())).await?;
//! println!("{} due {}", outcome.record.discharge_id, outcome.record.balance_due);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod discharge;
pub mod discount;
pub mod documents;
pub mod error;
pub mod identifier;
pub mod locks;
pub mod models;
pub mod nicu;
pub mod occupancy;
pub mod payment;
pub mod sources;
pub mod store;

pub use aggregate::*;
pub use config::*;
pub use discharge::*;
pub use discount::*;
pub use documents::*;
pub use error::*;
pub use identifier::*;
pub use locks::*;
pub use models::*;
pub use nicu::*;
pub use occupancy::*;
pub use payment::*;
pub use sources::*;
pub use store::*;
