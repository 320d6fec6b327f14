// Logger configuration
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub redaction_enabled: bool,
    pub json_output: bool,
    pub log_level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            redaction_enabled: true,
            json_output: false,
            log_level: "info".to_string(),
        }
    }
}

impl LoggerConfig {
    /// Read overrides from `LOG_LEVEL`, `LOG_JSON` and `LOG_REDACTION`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config.json_output = std::env::var("LOG_JSON")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.json_output);

        config.redaction_enabled = std::env::var("LOG_REDACTION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.redaction_enabled);

        config
    }
}
