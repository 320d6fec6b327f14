//! Discharge finalization.
//!
//! `finalize` turns an active admission into an immutable [`DischargeRecord`]:
//! collect charges, compute the breakdown, issue an identifier, persist the
//! record, mark the admission discharged, free the bed and render the sheet.
//! Only validation failures, state conflicts and a failed admission commit
//! abort it; every other problem is returned as a [`BillingWarning`].

use chrono::Utc;
use dashmap::DashMap;
use logger_redacted::PiiRedactor;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::aggregate::{compute_breakdown, room_charges, stay_days, Breakdown, BreakdownInput, DischargeInputs};
use crate::config::BillingConfig;
use crate::documents::{
    CurrencyFormatter, DischargeDocument, DocumentRenderer, JsonDocumentRenderer, RenderedDocument,
    SymbolCurrencyFormatter,
};
use crate::error::{BillingError, BillingResult, BillingWarning};
use crate::identifier::DischargeIdentifiers;
use crate::locks::KeyedLocks;
use crate::models::{Admission, AdmissionStatus, DischargeRecord, Doctor, Patient, Room};
use crate::occupancy::{ReleaseOutcome, RoomOccupancyTracker};
use crate::sources::{ChargeSourceReader, CollectedCharges};
use crate::store::{get_required, DischargeFilter, HospitalStore, Record, Repository, StoreError};

const DISCHARGE_RECORDS: &str = "discharge_records";

/// Result of a successful discharge
#[derive(Debug, Clone, PartialEq)]
pub struct DischargeOutcome {
    pub record: DischargeRecord,
    /// False when the record only lives in the backfill queue
    pub persisted: bool,
    pub warnings: Vec<BillingWarning>,
    pub document: Option<RenderedDocument>,
}

/// Live totals for the discharge form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DischargePreview {
    pub stay_days: i64,
    pub room_charges: Decimal,
    #[serde(skip)]
    pub charges: CollectedCharges,
    pub breakdown: Breakdown,
}

struct ResolvedAdmission {
    admission: Admission,
    patient: Patient,
    doctor: Doctor,
    room: Room,
}

pub struct DischargeFinalizer {
    store: HospitalStore,
    sources: ChargeSourceReader,
    occupancy: RoomOccupancyTracker,
    identifiers: DischargeIdentifiers,
    formatter: Arc<dyn CurrencyFormatter>,
    renderer: Arc<dyn DocumentRenderer>,
    redactor: PiiRedactor,
    locks: KeyedLocks,
    /// Set once the discharge-record store has answered its probe positively
    persistence: OnceCell<()>,
    /// Records whose write was skipped, keyed by record id
    pending: DashMap<Uuid, DischargeRecord>,
}

impl DischargeFinalizer {
    pub fn new(store: HospitalStore, config: Arc<BillingConfig>) -> Self {
        Self {
            sources: ChargeSourceReader::new(store.clone(), config.clone()),
            occupancy: RoomOccupancyTracker::with_locks(store.rooms.clone(), store.locks.clone()),
            identifiers: DischargeIdentifiers::new(store.sequence.clone(), &config),
            formatter: Arc::new(SymbolCurrencyFormatter::new(config.currency_symbol.clone())),
            renderer: Arc::new(JsonDocumentRenderer),
            redactor: PiiRedactor::default(),
            locks: store.locks.clone(),
            persistence: OnceCell::new(),
            pending: DashMap::new(),
            store,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn CurrencyFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_redactor(mut self, redactor: PiiRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    /// Bed tracker shared with the admission flow.
    pub fn occupancy(&self) -> &RoomOccupancyTracker {
        &self.occupancy
    }

    /// Number of records waiting for [`Self::backfill_pending`].
    pub fn pending_backfill(&self) -> usize {
        self.pending.len()
    }

    #[instrument(skip(self, inputs))]
    pub async fn finalize(&self, admission_id: Uuid, inputs: DischargeInputs) -> BillingResult<DischargeOutcome> {
        reported(
            self.finalize_serialized(admission_id, &inputs).await,
            "finalize_discharge",
            admission_id,
        )
    }

    /// Discharge totals as they would be billed now, without side effects.
    #[instrument(skip(self, inputs))]
    pub async fn preview(&self, admission_id: Uuid, inputs: &DischargeInputs) -> BillingResult<DischargePreview> {
        let resolved = self.resolve(admission_id).await?;
        self.compute(&resolved, inputs).await
    }

    /// Cancel an active admission and free its bed.
    #[instrument(skip(self, reason))]
    pub async fn cancel_admission(&self, admission_id: Uuid, reason: &str) -> BillingResult<Admission> {
        reported(
            self.cancel_serialized(admission_id, reason.to_string()).await,
            "cancel_admission",
            admission_id,
        )
    }

    /// Render a finalized discharge again from what was stored.
    #[instrument(skip(self))]
    pub async fn reprint(&self, discharge_id: &str) -> BillingResult<RenderedDocument> {
        reported(self.reprint_inner(discharge_id).await, "reprint_discharge", discharge_id)
    }

    /// Write queued records once the discharge-record store is provisioned.
    /// Returns how many records were written.
    pub async fn backfill_pending(&self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        if !self.persistence_available().await {
            warn!(pending = self.pending.len(), "discharge record store still unprovisioned, backfill skipped");
            return 0;
        }

        let queued: Vec<DischargeRecord> = self.pending.iter().map(|entry| entry.value().clone()).collect();
        let mut written = 0;
        for record in queued {
            match self.store.discharges.create(record.clone()).await {
                Ok(_) => {
                    self.pending.remove(&record.id);
                    written += 1;
                }
                Err(StoreError::Duplicate(_)) => {
                    self.pending.remove(&record.id);
                }
                Err(e) => {
                    warn!(discharge_id = %record.discharge_id, error = %e, "discharge record backfill failed");
                }
            }
        }

        info!(written, remaining = self.pending.len(), "discharge record backfill finished");
        written
    }

    async fn finalize_serialized(&self, admission_id: Uuid, inputs: &DischargeInputs) -> BillingResult<DischargeOutcome> {
        let _guard = self.locks.acquire(admission_id).await;

        let resolved = self.resolve(admission_id).await?;
        let preview = self.compute(&resolved, inputs).await?;
        let DischargePreview {
            stay_days,
            charges,
            breakdown,
            ..
        } = preview;

        let mut warnings = charges.warnings;
        let identifier = self.identifiers.generate().await;
        warnings.extend(identifier.warning);

        let record = DischargeRecord {
            id: Uuid::new_v4(),
            discharge_id: identifier.value,
            identifier_source: identifier.source,
            admission_id,
            patient_id: resolved.patient.id,
            doctor_id: resolved.doctor.id,
            room_id: resolved.room.id,
            admitted_at: resolved.admission.admitted_at,
            discharged_at: inputs.discharged_at,
            stay_days,
            breakdown: breakdown.charges,
            lab_items: charges.lab_items,
            treatment_items: charges.treatment_items,
            nicu_items: charges.nicu_items,
            manual_items: inputs.manual_items.clone(),
            discount_type: inputs.discount_type,
            discount_value: inputs.discount_value,
            discount_amount: breakdown.discount.discount_amount,
            subtotal: breakdown.subtotal,
            final_total: breakdown.discount.final_total,
            deposit: resolved.admission.deposit,
            additional_payment: inputs.additional_payment,
            total_paid: breakdown.settlement.total_paid,
            balance_due: breakdown.settlement.balance_due,
            refund_amount: breakdown.settlement.refund_amount,
            payment_status: breakdown.settlement.payment_status,
            summary: inputs.summary.clone(),
            created_at: Utc::now(),
        };

        // The admission may have been changed outside this engine meanwhile.
        let mut admission = get_required(self.store.admissions.as_ref(), admission_id).await?;
        if !admission.is_active() {
            return Err(BillingError::Conflict(format!(
                "admission {} became {} before discharge could be committed",
                admission_id, admission.status
            )));
        }

        let persisted = self.persist(&record, &mut warnings).await;

        admission.status = AdmissionStatus::Discharged;
        admission.discharge_id = Some(record.discharge_id.clone());
        admission.discharged_at = Some(record.discharged_at);
        if let Err(e) = self.commit(admission).await {
            self.pending.remove(&record.id);
            return Err(e);
        }

        self.release_bed(resolved.room.id, &mut warnings).await;

        let document = match self
            .render(&record, &resolved.patient.name, &resolved.doctor.name, &resolved.room.label())
            .await
        {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(discharge_id = %record.discharge_id, error = %e, "discharge document rendering failed");
                warnings.push(BillingWarning::Rendering { message: e.to_string() });
                None
            }
        };

        info!(
            %admission_id,
            discharge_id = %record.discharge_id,
            patient = %self.redactor.redact_name(&resolved.patient.name),
            final_total = %record.final_total,
            payment_status = %record.payment_status,
            persisted,
            warnings = warnings.len(),
            "admission discharged"
        );

        Ok(DischargeOutcome {
            record,
            persisted,
            warnings,
            document,
        })
    }

    async fn cancel_serialized(&self, admission_id: Uuid, reason: String) -> BillingResult<Admission> {
        let _guard = self.locks.acquire(admission_id).await;

        let mut admission = self.active_admission(admission_id).await?;
        admission.status = AdmissionStatus::Cancelled;
        admission.cancelled_at = Some(Utc::now());
        admission.cancellation_reason = Some(reason);
        let admission = self.commit(admission).await?;

        if let Some(room_id) = admission.room_id {
            let mut warnings = Vec::new();
            self.release_bed(room_id, &mut warnings).await;
        }

        info!(%admission_id, "admission cancelled");
        Ok(admission)
    }

    async fn reprint_inner(&self, discharge_id: &str) -> BillingResult<RenderedDocument> {
        let queued = self
            .pending
            .iter()
            .find(|entry| entry.value().discharge_id == discharge_id)
            .map(|entry| entry.value().clone());
        let record = match queued {
            Some(record) => record,
            None => self.stored_record(discharge_id).await?,
        };

        let patient = get_required(self.store.patients.as_ref(), record.patient_id).await?;
        let doctor = get_required(self.store.doctors.as_ref(), record.doctor_id).await?;
        let room = get_required(self.store.rooms.as_ref(), record.room_id).await?;

        self.render(&record, &patient.name, &doctor.name, &room.label()).await
    }

    async fn stored_record(&self, discharge_id: &str) -> BillingResult<DischargeRecord> {
        let filter = DischargeFilter {
            discharge_id: Some(discharge_id.to_string()),
            ..Default::default()
        };
        self.store
            .discharges
            .query(&filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                BillingError::Store(StoreError::NotFound(format!(
                    "{} {}",
                    DischargeRecord::ENTITY,
                    discharge_id
                )))
            })
    }

    /// Write an admission transition only if the stored admission is still
    /// active, whoever else is writing to the store.
    async fn commit(&self, admission: Admission) -> BillingResult<Admission> {
        let admission_id = admission.id;
        match self.store.admissions.update_if(admission, &Admission::is_active).await {
            Ok(admission) => Ok(admission),
            Err(StoreError::Stale(_)) => Err(BillingError::Conflict(format!(
                "admission {} stopped being active before the change could be committed",
                admission_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn active_admission(&self, admission_id: Uuid) -> BillingResult<Admission> {
        let admission = self
            .store
            .admissions
            .get_by_id(admission_id)
            .await?
            .ok_or_else(|| BillingError::Validation(format!("admission {} does not exist", admission_id)))?;

        if !admission.is_active() {
            return Err(BillingError::Conflict(format!(
                "admission {} is already {}",
                admission_id, admission.status
            )));
        }
        Ok(admission)
    }

    async fn resolve(&self, admission_id: Uuid) -> BillingResult<ResolvedAdmission> {
        let admission = self.active_admission(admission_id).await?;

        let (patient, doctor, room) = tokio::try_join!(
            reference(self.store.patients.as_ref(), admission.patient_id, admission_id),
            reference(self.store.doctors.as_ref(), admission.doctor_id, admission_id),
            reference(self.store.rooms.as_ref(), admission.room_id, admission_id),
        )?;

        Ok(ResolvedAdmission {
            admission,
            patient,
            doctor,
            room,
        })
    }

    async fn compute(&self, resolved: &ResolvedAdmission, inputs: &DischargeInputs) -> BillingResult<DischargePreview> {
        let admitted_at = resolved.admission.admitted_at;
        inputs.validate(admitted_at)?;

        let stay_days = stay_days(admitted_at, inputs.discharged_at);
        let room_charges = room_charges(stay_days, resolved.room.rate_per_day);

        let charges = self
            .sources
            .collect(resolved.admission.id, &resolved.patient, admitted_at, inputs.discharged_at)
            .await;

        let breakdown = compute_breakdown(&BreakdownInput::from_inputs(
            inputs,
            room_charges,
            charges.lab_total,
            charges.treatment_total,
            charges.nicu_total,
            resolved.admission.deposit,
        ))?;

        debug!(stay_days, subtotal = %breakdown.subtotal, final_total = %breakdown.discount.final_total, "discharge computed");
        Ok(DischargePreview {
            stay_days,
            room_charges,
            charges,
            breakdown,
        })
    }

    async fn persistence_available(&self) -> bool {
        self.persistence
            .get_or_try_init(|| async {
                if self.store.discharges.is_provisioned().await {
                    Ok(())
                } else {
                    Err(())
                }
            })
            .await
            .is_ok()
    }

    /// Store the record, or queue it for backfill when the store cannot take it.
    async fn persist(&self, record: &DischargeRecord, warnings: &mut Vec<BillingWarning>) -> bool {
        let message = if self.persistence_available().await {
            match self.store.discharges.create(record.clone()).await {
                Ok(_) => return true,
                Err(e) => format!("discharge record write failed: {}", e),
            }
        } else {
            "discharge record store is not provisioned".to_string()
        };

        warn!(discharge_id = %record.discharge_id, %message, "discharge record queued for backfill");
        self.pending.insert(record.id, record.clone());
        warnings.push(BillingWarning::DegradedCapability {
            capability: DISCHARGE_RECORDS.to_string(),
            message,
        });
        false
    }

    async fn release_bed(&self, room_id: Uuid, warnings: &mut Vec<BillingWarning>) {
        match self.occupancy.release(room_id).await {
            Ok(ReleaseOutcome::Released { .. }) => {}
            Ok(ReleaseOutcome::AlreadyEmpty) => warnings.push(BillingWarning::BedAlreadyReleased { room_id }),
            Err(e) => {
                warn!(%room_id, error = %e, "bed release failed");
                warnings.push(BillingWarning::DegradedCapability {
                    capability: "room_occupancy".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    async fn render(
        &self,
        record: &DischargeRecord,
        patient_name: &str,
        doctor_name: &str,
        room_label: &str,
    ) -> BillingResult<RenderedDocument> {
        let document = DischargeDocument::build(record, patient_name, doctor_name, room_label, self.formatter.as_ref());
        self.renderer.render(&document).await
    }
}

/// Resolve a reference an admission must carry.
async fn reference<T: Record>(repo: &dyn Repository<T>, id: Option<Uuid>, admission_id: Uuid) -> BillingResult<T> {
    let id = id.ok_or_else(|| {
        BillingError::Validation(format!("admission {} has no {} assigned", admission_id, T::ENTITY))
    })?;
    repo.get_by_id(id).await?.ok_or_else(|| {
        BillingError::Validation(format!("admission {} references missing {} {}", admission_id, T::ENTITY, id))
    })
}

fn reported<T>(result: BillingResult<T>, operation: &str, entity_id: impl ToString) -> BillingResult<T> {
    match &result {
        Err(e) if e.is_fatal() => e.report(operation, entity_id),
        Err(e) => warn!(operation, entity_id = %entity_id.to_string(), error = %e, "operation degraded"),
        Ok(_) => {}
    }
    result
}
