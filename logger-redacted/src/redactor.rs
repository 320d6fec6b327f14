use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    #[allow(clippy::unwrap_used)]
    static ref EMAIL_REGEX: Regex = Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    #[allow(clippy::unwrap_used)]
    static ref PHONE_REGEX: Regex = Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap();
    #[allow(clippy::unwrap_used)]
    static ref MRN_REGEX: Regex = Regex::new(r"\bMRN[-:]?\d+\b").unwrap();
}

/// PII redaction configuration
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub enabled: bool,
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub redact_mrns: bool,
    pub hash_for_correlation: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_emails: true,
            redact_phones: true,
            redact_mrns: true,
            hash_for_correlation: true,
        }
    }
}

/// PII redactor for log fields.
///
/// Patient names are never pattern-matched; callers pass them through
/// [`PiiRedactor::redact_name`] explicitly when building log fields.
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    /// A redactor that passes every value through unchanged.
    pub fn disabled() -> Self {
        Self::new(RedactionConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn redact(&self, text: &str) -> String {
        if !self.config.enabled {
            return text.to_string();
        }

        let mut result = text.to_string();

        if self.config.redact_emails {
            result = self.replace(&EMAIL_REGEX, &result, "EMAIL", "***@***");
        }

        if self.config.redact_mrns {
            result = self.replace(&MRN_REGEX, &result, "MRN", "MRN******");
        }

        if self.config.redact_phones {
            result = self.replace(&PHONE_REGEX, &result, "PHONE", "(***) ***-****");
        }

        result
    }

    /// Redact a person's name: initials when correlation hashing is off,
    /// a short stable hash otherwise.
    pub fn redact_name(&self, name: &str) -> String {
        if !self.config.enabled {
            return name.to_string();
        }

        if self.config.hash_for_correlation {
            return format!("NAME[{}]", self.hash_value(name));
        }

        let initials: String = name
            .split_whitespace()
            .filter_map(|part| part.chars().next())
            .map(|c| format!("{}.", c.to_uppercase()))
            .collect();

        if initials.is_empty() {
            "***".to_string()
        } else {
            initials
        }
    }

    fn replace(&self, pattern: &Regex, text: &str, label: &str, mask: &str) -> String {
        pattern
            .replace_all(text, |caps: &regex::Captures| {
                if self.config.hash_for_correlation {
                    format!("{}[{}]", label, self.hash_value(&caps[0]))
                } else {
                    mask.to_string()
                }
            })
            .to_string()
    }

    fn hash_value(&self, value: &str) -> String {
        let digest = Sha256::digest(value.as_bytes());
        general_purpose::STANDARD_NO_PAD.encode(digest.get(..6).unwrap_or_default())
    }
}
