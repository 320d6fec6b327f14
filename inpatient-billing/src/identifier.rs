//! Discharge identifier strategies.
//!
//! Identifiers come from a named sequence when the sequence service answers
//! its probe; otherwise, or when the increment itself fails, a timestamp
//! identifier is issued so discharge never blocks on the sequence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::BillingConfig;
use crate::error::{BillingResult, BillingWarning};
use crate::models::IdentifierSource;
use crate::store::SequenceService;

const TIMESTAMP_DIGITS: i64 = 10_000_000_000;

/// Last millisecond value handed out by any timestamp generator in this
/// process. Two issues in the same millisecond take consecutive values.
static LAST_ISSUED_MILLIS: AtomicI64 = AtomicI64::new(i64::MIN);

#[async_trait]
pub trait IdentifierGenerator: Send + Sync {
    fn source(&self) -> IdentifierSource;

    async fn next_identifier(&self) -> BillingResult<String>;
}

/// `{prefix}-{sequence:06}`
pub struct SequenceIdentifierGenerator {
    sequence: Arc<dyn SequenceService>,
    name: String,
    prefix: String,
}

impl SequenceIdentifierGenerator {
    pub fn new(sequence: Arc<dyn SequenceService>, name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            sequence,
            name: name.into(),
            prefix: prefix.into(),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.sequence.is_available().await
    }
}

#[async_trait]
impl IdentifierGenerator for SequenceIdentifierGenerator {
    fn source(&self) -> IdentifierSource {
        IdentifierSource::Sequence
    }

    async fn next_identifier(&self) -> BillingResult<String> {
        let value = self.sequence.next_value(&self.name).await?;
        Ok(format!("{}-{:06}", self.prefix, value))
    }
}

/// `{prefix}-T{last 10 digits of epoch millis}`
pub struct TimestampIdentifierGenerator {
    prefix: String,
}

impl TimestampIdentifierGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn identifier_at(&self, at: DateTime<Utc>) -> String {
        self.format_millis(at.timestamp_millis())
    }

    /// Identifier for `at`, moved past the last one issued in this process so
    /// values never repeat.
    pub fn issue_at(&self, at: DateTime<Utc>) -> String {
        let wanted = at.timestamp_millis();
        let next = |last: i64| wanted.max(last.saturating_add(1));
        let previous = match LAST_ISSUED_MILLIS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last))) {
            Ok(last) | Err(last) => last,
        };
        self.format_millis(next(previous))
    }

    fn format_millis(&self, millis: i64) -> String {
        format!("{}-T{:010}", self.prefix, millis.rem_euclid(TIMESTAMP_DIGITS))
    }
}

#[async_trait]
impl IdentifierGenerator for TimestampIdentifierGenerator {
    fn source(&self) -> IdentifierSource {
        IdentifierSource::Fallback
    }

    async fn next_identifier(&self) -> BillingResult<String> {
        Ok(self.issue_at(Utc::now()))
    }
}

/// An issued identifier and how it was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedIdentifier {
    pub value: String,
    pub source: IdentifierSource,
    pub warning: Option<BillingWarning>,
}

/// Picks the sequence strategy when available, the timestamp one otherwise
pub struct DischargeIdentifiers {
    sequence: Option<SequenceIdentifierGenerator>,
    fallback: TimestampIdentifierGenerator,
}

impl DischargeIdentifiers {
    pub fn new(sequence: Option<Arc<dyn SequenceService>>, config: &BillingConfig) -> Self {
        Self {
            sequence: sequence.map(|service| {
                SequenceIdentifierGenerator::new(
                    service,
                    config.discharge_sequence.clone(),
                    config.discharge_id_prefix.clone(),
                )
            }),
            fallback: TimestampIdentifierGenerator::new(config.discharge_id_prefix.clone()),
        }
    }

    /// Strategy selected by probing the sequence service.
    pub async fn select(&self) -> &dyn IdentifierGenerator {
        match self.available_sequence().await {
            Some(sequence) => sequence,
            None => &self.fallback,
        }
    }

    pub async fn generate(&self) -> GeneratedIdentifier {
        let generator = self.select().await;
        let (value, reason) = match generator.next_identifier().await {
            Ok(value) if generator.source() == IdentifierSource::Sequence => {
                debug!(discharge_id = %value, "discharge identifier issued from sequence");
                return GeneratedIdentifier {
                    value,
                    source: IdentifierSource::Sequence,
                    warning: None,
                };
            }
            Ok(value) => (value, "discharge sequence is unavailable".to_string()),
            // The probe passed but the increment did not.
            Err(e) => (self.fallback.issue_at(Utc::now()), format!("discharge sequence failed: {}", e)),
        };

        warn!(discharge_id = %value, %reason, "using timestamp discharge identifier");
        GeneratedIdentifier {
            value,
            source: IdentifierSource::Fallback,
            warning: Some(BillingWarning::IdentifierFallback { message: reason }),
        }
    }

    async fn available_sequence(&self) -> Option<&SequenceIdentifierGenerator> {
        let sequence = self.sequence.as_ref()?;
        if sequence.is_available().await {
            Some(sequence)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySequence;
    use chrono::TimeZone;

    fn identifiers(sequence: &Arc<InMemorySequence>) -> DischargeIdentifiers {
        DischargeIdentifiers::new(Some(sequence.clone()), &BillingConfig::default())
    }

    #[tokio::test]
    async fn test_sequence_identifiers_are_zero_padded() {
        let sequence = Arc::new(InMemorySequence::new());
        let ids = identifiers(&sequence);

        let first = ids.generate().await;
        let second = ids.generate().await;
        assert_eq!(first.value, "DIS-000001");
        assert_eq!(second.value, "DIS-000002");
        assert_eq!(first.source, IdentifierSource::Sequence);
        assert!(first.warning.is_none());
    }

    #[test]
    fn test_timestamp_identifier_keeps_last_ten_digits() {
        let generator = TimestampIdentifierGenerator::new("DIS");
        let at = Utc.timestamp_millis_opt(1_717_171_717_123).unwrap();
        assert_eq!(generator.identifier_at(at), "DIS-T7171717123");

        let early = Utc.timestamp_millis_opt(42).unwrap();
        assert_eq!(generator.identifier_at(early), "DIS-T0000000042");
    }

    #[test]
    fn test_same_millisecond_issues_distinct_identifiers() {
        let generator = TimestampIdentifierGenerator::new("DIS");
        let at = Utc::now();
        let issued: std::collections::HashSet<String> = (0..50).map(|_| generator.issue_at(at)).collect();
        assert_eq!(issued.len(), 50);
    }

    #[tokio::test]
    async fn test_unavailable_sequence_falls_back() {
        let sequence = Arc::new(InMemorySequence::new());
        sequence.set_available(false);
        let ids = identifiers(&sequence);

        assert_eq!(ids.select().await.source(), IdentifierSource::Fallback);
        let issued = ids.generate().await;
        assert!(issued.value.starts_with("DIS-T"));
        assert_eq!(issued.source, IdentifierSource::Fallback);
        assert!(matches!(issued.warning, Some(BillingWarning::IdentifierFallback { .. })));
        assert_ne!(ids.generate().await.value, issued.value);
    }

    #[tokio::test]
    async fn test_failing_increment_falls_back() {
        let sequence = Arc::new(InMemorySequence::new());
        sequence.set_failing(true);
        let ids = identifiers(&sequence);

        assert_eq!(ids.select().await.source(), IdentifierSource::Sequence);
        let issued = ids.generate().await;
        assert_eq!(issued.source, IdentifierSource::Fallback);
        assert_eq!(issued.value.len(), "DIS-T".len() + 10);
    }

    #[tokio::test]
    async fn test_no_sequence_service_uses_fallback() {
        let ids = DischargeIdentifiers::new(None, &BillingConfig::default());
        let issued = ids.generate().await;
        assert_eq!(issued.source, IdentifierSource::Fallback);
    }
}
