//! Charge collection across the subsystems that bill an admission.
//!
//! Lab orders, treatments and three NICU sources are read concurrently. Each
//! lookup is bounded by [`BillingConfig::lookup_timeout`]; a source that fails
//! or times out contributes nothing and is reported as a [`BillingWarning`].

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::BillingWarning;
use crate::models::{ChargeLineItem, ChargeSource, NicuObservation, Patient};
use crate::nicu::current_reading;
use crate::store::{ChargeFilter, HospitalStore, ObservationFilter, PatientFilter, StoreError, StoreResult};

/// Everything the subsystems billed against one admission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedCharges {
    pub lab_total: Decimal,
    pub lab_items: Vec<ChargeLineItem>,
    pub treatment_total: Decimal,
    pub treatment_items: Vec<ChargeLineItem>,
    pub nicu_total: Decimal,
    pub nicu_items: Vec<ChargeLineItem>,
    pub warnings: Vec<BillingWarning>,
}

/// Observation plus the baby it was billed for, when billed to the mother
type TaggedObservation = (NicuObservation, Option<String>);

/// Read-only view over the charge-bearing repositories
#[derive(Clone)]
pub struct ChargeSourceReader {
    store: HospitalStore,
    config: Arc<BillingConfig>,
}

impl ChargeSourceReader {
    pub fn new(store: HospitalStore, config: Arc<BillingConfig>) -> Self {
        Self { store, config }
    }

    /// Collect the charges of an admission as of `as_of`.
    ///
    /// Lab and treatment charges and NICU sessions of linked babies or of a
    /// newborn patient only count from `admission_start` onwards. Sessions
    /// tied to the admission itself are always included.
    #[instrument(skip(self, patient), fields(patient_id = %patient.id))]
    pub async fn collect(
        &self,
        admission_id: Uuid,
        patient: &Patient,
        admission_start: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> CollectedCharges {
        let charge_filter = ChargeFilter {
            patient_id: Some(patient.id),
        };

        let (labs, treatments, by_admission, linked_babies, own_sessions) = tokio::join!(
            self.bounded(ChargeSource::Lab, "lab orders", self.store.lab_orders.query(&charge_filter)),
            self.bounded(ChargeSource::Treatment, "treatments", self.store.treatments.query(&charge_filter)),
            self.bounded(ChargeSource::Nicu, "admission NICU sessions", self.admission_sessions(admission_id)),
            self.bounded(ChargeSource::Nicu, "linked baby NICU sessions", self.linked_baby_sessions(patient)),
            self.bounded(ChargeSource::Nicu, "newborn NICU sessions", self.own_sessions(patient)),
        );

        let mut charges = CollectedCharges::default();

        if let Some(orders) = labs.ok_or_warn(&mut charges.warnings) {
            let mut items: Vec<ChargeLineItem> = orders
                .iter()
                .filter(|order| order.ordered_at >= admission_start)
                .map(ChargeLineItem::from)
                .collect();
            items.sort_by_key(|item| item.occurred_at);
            charges.lab_total = items.iter().map(|item| item.amount).sum();
            charges.lab_items = items;
        }

        if let Some(performed) = treatments.ok_or_warn(&mut charges.warnings) {
            let mut items: Vec<ChargeLineItem> = performed
                .iter()
                .filter(|treatment| treatment.performed_at >= admission_start)
                .map(ChargeLineItem::from)
                .collect();
            items.sort_by_key(|item| item.occurred_at);
            charges.treatment_total = items.iter().map(|item| item.amount).sum();
            charges.treatment_items = items;
        }

        let in_window = |sessions: Vec<TaggedObservation>| -> Vec<TaggedObservation> {
            sessions
                .into_iter()
                .filter(|(obs, _)| obs.started_at >= admission_start)
                .collect()
        };

        let sources = [
            by_admission.ok_or_warn(&mut charges.warnings),
            linked_babies.ok_or_warn(&mut charges.warnings).map(in_window),
            own_sessions.ok_or_warn(&mut charges.warnings).map(in_window),
        ];

        let sessions = merge_sessions(sources.into_iter().flatten());
        charges.nicu_items = sessions
            .iter()
            .map(|(obs, tag)| nicu_line_item(obs, tag.clone(), as_of))
            .collect();
        charges.nicu_total = charges.nicu_items.iter().map(|item| item.amount).sum();

        debug!(
            lab = %charges.lab_total,
            treatment = %charges.treatment_total,
            nicu = %charges.nicu_total,
            warnings = charges.warnings.len(),
            "charges collected"
        );
        charges
    }

    async fn admission_sessions(&self, admission_id: Uuid) -> StoreResult<Vec<TaggedObservation>> {
        let sessions = self
            .store
            .observations
            .query(&ObservationFilter {
                admission_id: Some(admission_id),
                ..Default::default()
            })
            .await?;
        Ok(sessions.into_iter().map(|obs| (obs, None)).collect())
    }

    async fn linked_baby_sessions(&self, patient: &Patient) -> StoreResult<Vec<TaggedObservation>> {
        if !patient.may_have_linked_babies() {
            return Ok(Vec::new());
        }

        let babies = self
            .store
            .patients
            .query(&PatientFilter {
                mother_id: Some(patient.id),
            })
            .await?;

        let lookups = babies.iter().map(|baby| async move {
            let sessions = self
                .store
                .observations
                .query(&ObservationFilter {
                    subject_id: Some(baby.id),
                    ..Default::default()
                })
                .await?;
            Ok::<_, StoreError>(
                sessions
                    .into_iter()
                    .map(|obs| (obs, Some(baby.name.clone())))
                    .collect::<Vec<_>>(),
            )
        });

        Ok(try_join_all(lookups).await?.into_iter().flatten().collect())
    }

    async fn own_sessions(&self, patient: &Patient) -> StoreResult<Vec<TaggedObservation>> {
        if !patient.is_newborn {
            return Ok(Vec::new());
        }

        let sessions = self
            .store
            .observations
            .query(&ObservationFilter {
                subject_id: Some(patient.id),
                ..Default::default()
            })
            .await?;
        Ok(sessions.into_iter().map(|obs| (obs, None)).collect())
    }

    /// Run one lookup under the configured deadline.
    async fn bounded<T, F>(&self, origin: ChargeSource, label: &str, lookup: F) -> Result<T, BillingWarning>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let timeout = self.config.lookup_timeout;
        let message = match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => format!("{} lookup failed: {}", label, e),
            Err(_) => format!("{} lookup timed out after {} ms", label, timeout.as_millis()),
        };

        warn!(source = %origin, %message, "charge source degraded to zero");
        Err(BillingWarning::SourceLookup { origin, message })
    }
}

trait OrWarn<T> {
    fn ok_or_warn(self, warnings: &mut Vec<BillingWarning>) -> Option<T>;
}

impl<T> OrWarn<T> for Result<T, BillingWarning> {
    fn ok_or_warn(self, warnings: &mut Vec<BillingWarning>) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(warning) => {
                warnings.push(warning);
                None
            }
        }
    }
}

/// Merge NICU sources in order, deduplicating by observation id. The first
/// source to contribute a session wins, but a baby tag seen later is kept.
fn merge_sessions(sources: impl Iterator<Item = Vec<TaggedObservation>>) -> Vec<TaggedObservation> {
    let mut merged: Vec<TaggedObservation> = Vec::new();
    let mut seen: HashMap<Uuid, usize> = HashMap::new();

    for (obs, tag) in sources.flatten() {
        match seen.get(&obs.id) {
            Some(&index) => {
                if let Some((_, existing)) = merged.get_mut(index) {
                    if existing.is_none() {
                        *existing = tag;
                    }
                }
            }
            None => {
                seen.insert(obs.id, merged.len());
                merged.push((obs, tag));
            }
        }
    }

    merged.sort_by_key(|(obs, _)| obs.started_at);
    merged
}

fn nicu_line_item(obs: &NicuObservation, tag: Option<String>, as_of: DateTime<Utc>) -> ChargeLineItem {
    let reading = current_reading(obs, as_of);
    let state = if obs.is_active() { ", in progress" } else { "" };
    ChargeLineItem {
        source: ChargeSource::Nicu,
        description: format!("NICU care {} h @ {}/h{}", reading.hours, obs.hourly_rate, state),
        amount: reading.charge,
        occurred_at: Some(obs.started_at),
        tag,
    }
}
