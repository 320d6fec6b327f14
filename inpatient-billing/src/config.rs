//! Engine configuration
//!
//! Defaults are suitable for development; every value can be overridden from
//! the environment through [`BillingConfig::from_env`].

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, PartialEq)]
pub struct BillingConfig {
    /// Hourly NICU rate used when no NICU room carries one
    pub default_nicu_hourly_rate: Decimal,
    /// Upper bound for each charge-source lookup during aggregation
    pub lookup_timeout: Duration,
    /// Prefix of generated discharge identifiers
    pub discharge_id_prefix: String,
    /// Name of the sequence backing discharge identifiers
    pub discharge_sequence: String,
    pub currency_symbol: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_nicu_hourly_rate: Decimal::from(500),
            lookup_timeout: Duration::from_secs(5),
            discharge_id_prefix: "DIS".to_string(),
            discharge_sequence: "discharge".to_string(),
            currency_symbol: "Rs.".to_string(),
        }
    }
}

impl BillingConfig {
    pub fn from_env() -> BillingResult<Self> {
        let mut config = Self::default();

        if let Ok(rate) = std::env::var("BILLING_DEFAULT_NICU_HOURLY_RATE") {
            config.default_nicu_hourly_rate = Decimal::from_str(rate.trim()).map_err(|e| {
                BillingError::Config(format!("BILLING_DEFAULT_NICU_HOURLY_RATE is not a decimal: {}", e))
            })?;
        }

        if let Ok(timeout) = std::env::var("BILLING_LOOKUP_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                BillingError::Config(format!("BILLING_LOOKUP_TIMEOUT_MS must be milliseconds, got {}", timeout))
            })?;
            config.lookup_timeout = Duration::from_millis(millis);
        }

        if let Ok(prefix) = std::env::var("BILLING_DISCHARGE_ID_PREFIX") {
            config.discharge_id_prefix = prefix;
        }

        if let Ok(sequence) = std::env::var("BILLING_DISCHARGE_SEQUENCE") {
            config.discharge_sequence = sequence;
        }

        if let Ok(symbol) = std::env::var("BILLING_CURRENCY_SYMBOL") {
            config.currency_symbol = symbol;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BillingResult<()> {
        if self.default_nicu_hourly_rate.is_sign_negative() {
            return Err(BillingError::Config("default NICU hourly rate cannot be negative".to_string()));
        }

        if self.lookup_timeout.is_zero() {
            return Err(BillingError::Config("lookup timeout must be greater than zero".to_string()));
        }

        if self.discharge_id_prefix.trim().is_empty() {
            return Err(BillingError::Config("discharge identifier prefix cannot be empty".to_string()));
        }

        if self.discharge_sequence.trim().is_empty() {
            return Err(BillingError::Config("discharge sequence name cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BillingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let negative = BillingConfig {
            default_nicu_hourly_rate: Decimal::from(-1),
            ..Default::default()
        };
        assert!(matches!(negative.validate(), Err(BillingError::Config(_))));

        let zero_timeout = BillingConfig {
            lookup_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let blank_prefix = BillingConfig {
            discharge_id_prefix: "  ".to_string(),
            ..Default::default()
        };
        assert!(blank_prefix.validate().is_err());
    }

    // Single test touching the environment so parallel tests do not race.
    #[test]
    fn test_from_env_overrides_and_errors() {
        std::env::set_var("BILLING_DEFAULT_NICU_HOURLY_RATE", "650.50");
        std::env::set_var("BILLING_LOOKUP_TIMEOUT_MS", "250");
        std::env::set_var("BILLING_DISCHARGE_ID_PREFIX", "DC");

        let config = BillingConfig::from_env().unwrap();
        assert_eq!(config.default_nicu_hourly_rate, Decimal::new(65050, 2));
        assert_eq!(config.lookup_timeout, Duration::from_millis(250));
        assert_eq!(config.discharge_id_prefix, "DC");

        std::env::set_var("BILLING_LOOKUP_TIMEOUT_MS", "soon");
        assert!(matches!(BillingConfig::from_env(), Err(BillingError::Config(_))));

        std::env::remove_var("BILLING_DEFAULT_NICU_HOURLY_RATE");
        std::env::remove_var("BILLING_LOOKUP_TIMEOUT_MS");
        std::env::remove_var("BILLING_DISCHARGE_ID_PREFIX");
    }
}
