//! Logging setup with PII redaction for the inpatient billing engine
//!
//! Billing logs name admissions, rooms and amounts freely, but patient
//! names, phone numbers and medical record numbers must never reach a log
//! sink in clear text. This crate installs the `tracing` subscriber used by
//! the engine's binaries and tests, and provides the [`PiiRedactor`] that
//! services use when building log fields.
//!
//! # Example
//!
//! ```rust
//! use logger_redacted::{init_logging, LoggerConfig, PiiRedactor, RedactionConfig};
//!
//! init_logging(&LoggerConfig::default()).ok();
//!
//! let redactor = PiiRedactor::new(RedactionConfig::default());
//! tracing::info!(patient = %redactor.redact_name("Amina Bello"), "admission discharged");
//! ```

pub mod redactor;
pub mod config;

pub use redactor::*;
pub use config::*;

use error_common::RustCareError;
use tracing_subscriber::{fmt, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over [`LoggerConfig::log_level`] when set. Returns an error
/// when a global subscriber is already installed.
pub fn init_logging(config: &LoggerConfig) -> Result<(), RustCareError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| RustCareError::ConfigError(format!("invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json_output {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .try_init()
    };

    result.map_err(|e| RustCareError::ConfigError(format!("logger already initialised: {}", e)))
}

/// Build the redactor matching the logger configuration.
pub fn redactor_for(config: &LoggerConfig) -> PiiRedactor {
    if config.redaction_enabled {
        PiiRedactor::new(RedactionConfig::default())
    } else {
        PiiRedactor::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggerConfig {
            log_level: "debug".to_string(),
            ..Default::default()
        };
        let first = init_logging(&config);
        let second = init_logging(&config);
        // Another test in this binary may have installed the subscriber first.
        assert!(first.is_ok() || second.is_err());
        assert!(second.is_err());
    }

    #[test]
    fn test_redactor_follows_config() {
        let off = LoggerConfig {
            redaction_enabled: false,
            ..Default::default()
        };
        assert_eq!(redactor_for(&off).redact_name("Amina Bello"), "Amina Bello");
        assert_ne!(redactor_for(&LoggerConfig::default()).redact_name("Amina Bello"), "Amina Bello");
    }
}
