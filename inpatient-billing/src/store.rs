//! Persistence collaborator used by the billing engine.
//!
//! The engine only needs `get_by_id`, `query`, `create` and `update` per
//! entity, plus a capability probe so it can tell an unmigrated table apart
//! from a failing one without relying on call failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::locks::KeyedLocks;
use crate::models::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Stale record: {0}")]
    Stale(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An entity the store can hold
pub trait Record: Clone + Send + Sync + 'static {
    type Filter: Send + Sync;

    const ENTITY: &'static str;

    fn id(&self) -> Uuid;

    fn matches(&self, filter: &Self::Filter) -> bool;
}

/// Repository interface, one per entity
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<T>>;

    /// Read records matching the given filter.
    /// `None` filter fields act as wildcards.
    async fn query(&self, filter: &T::Filter) -> StoreResult<Vec<T>>;

    async fn create(&self, record: T) -> StoreResult<T>;

    async fn update(&self, record: T) -> StoreResult<T>;

    /// Replace the stored record only while it still satisfies `expected`;
    /// otherwise nothing is written and `StoreError::Stale` is returned.
    ///
    /// The default reads then writes. Backends that can check and write in
    /// one step must override it.
    async fn update_if(&self, record: T, expected: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync)) -> StoreResult<T> {
        let current = self
            .get_by_id(record.id())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", T::ENTITY, record.id())))?;
        if !expected(&current) {
            return Err(StoreError::Stale(format!("{} {}", T::ENTITY, record.id())));
        }
        self.update(record).await
    }

    /// Whether the backing table exists. Queried once by callers that must
    /// tolerate a schema that has not been migrated yet.
    async fn is_provisioned(&self) -> bool {
        true
    }
}

/// Fetch a record that must exist.
pub async fn get_required<T: Record>(repo: &dyn Repository<T>, id: Uuid) -> StoreResult<T> {
    repo.get_by_id(id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("{} {}", T::ENTITY, id)))
}

// ============================================================================
// FILTERS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AdmissionFilter {
    pub patient_id: Option<Uuid>,
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct PatientFilter {
    pub mother_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomFilter {
    pub room_type: Option<RoomType>,
}

/// Shared by lab orders and treatments
#[derive(Debug, Clone, Default)]
pub struct ChargeFilter {
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    pub subject_id: Option<Uuid>,
    pub admission_id: Option<Uuid>,
    pub active_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DischargeFilter {
    pub admission_id: Option<Uuid>,
    pub discharge_id: Option<String>,
}

fn wildcard<V: PartialEq>(wanted: &Option<V>, actual: &V) -> bool {
    wanted.as_ref().map_or(true, |w| w == actual)
}

impl Record for Admission {
    type Filter = AdmissionFilter;
    const ENTITY: &'static str = "admission";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &AdmissionFilter) -> bool {
        filter.patient_id.map_or(true, |p| self.patient_id == Some(p)) && wildcard(&filter.status, &self.status)
    }
}

impl Record for Patient {
    type Filter = PatientFilter;
    const ENTITY: &'static str = "patient";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &PatientFilter) -> bool {
        filter.mother_id.map_or(true, |m| self.mother_id == Some(m))
    }
}

impl Record for Doctor {
    type Filter = ();
    const ENTITY: &'static str = "doctor";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, _filter: &()) -> bool {
        true
    }
}

impl Record for Room {
    type Filter = RoomFilter;
    const ENTITY: &'static str = "room";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &RoomFilter) -> bool {
        wildcard(&filter.room_type, &self.room_type)
    }
}

impl Record for LabOrder {
    type Filter = ChargeFilter;
    const ENTITY: &'static str = "lab order";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &ChargeFilter) -> bool {
        wildcard(&filter.patient_id, &self.patient_id)
    }
}

impl Record for Treatment {
    type Filter = ChargeFilter;
    const ENTITY: &'static str = "treatment";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &ChargeFilter) -> bool {
        wildcard(&filter.patient_id, &self.patient_id)
    }
}

impl Record for NicuObservation {
    type Filter = ObservationFilter;
    const ENTITY: &'static str = "nicu observation";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &ObservationFilter) -> bool {
        wildcard(&filter.subject_id, &self.subject_id)
            && filter.admission_id.map_or(true, |a| self.admission_id == Some(a))
            && (!filter.active_only || self.is_active())
    }
}

impl Record for DischargeRecord {
    type Filter = DischargeFilter;
    const ENTITY: &'static str = "discharge record";

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &DischargeFilter) -> bool {
        wildcard(&filter.admission_id, &self.admission_id) && wildcard(&filter.discharge_id, &self.discharge_id)
    }
}

// ============================================================================
// IN-MEMORY REPOSITORY
// ============================================================================

/// In-memory repository for testing and development.
///
/// Can be switched into an unprovisioned state (every call reports the
/// capability as unavailable), a failing state, or given artificial latency.
pub struct InMemoryRepository<T: Record> {
    records: Arc<DashMap<Uuid, T>>,
    provisioned: AtomicBool,
    failing: AtomicBool,
    latency_ms: AtomicU64,
}

impl<T: Record> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            provisioned: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// A repository whose backing table does not exist yet.
    pub fn unprovisioned() -> Self {
        let repo = Self::new();
        repo.set_provisioned(false);
        repo
    }

    pub fn set_provisioned(&self, provisioned: bool) {
        self.provisioned.store(provisioned, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert without going through the capability checks.
    pub fn seed(&self, record: T) -> T {
        self.records.insert(record.id(), record.clone());
        record
    }

    async fn gate(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.provisioned.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} table is not provisioned", T::ENTITY)));
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("{} backend unreachable", T::ENTITY)));
        }

        Ok(())
    }
}

impl<T: Record> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> Repository<T> for InMemoryRepository<T> {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Option<T>> {
        self.gate().await?;
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn query(&self, filter: &T::Filter) -> StoreResult<Vec<T>> {
        self.gate().await?;
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().matches(filter))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create(&self, record: T) -> StoreResult<T> {
        self.gate().await?;
        let id = record.id();
        if self.records.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("{} {}", T::ENTITY, id)));
        }
        self.records.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, record: T) -> StoreResult<T> {
        self.gate().await?;
        let id = record.id();
        match self.records.get_mut(&id) {
            Some(mut entry) => {
                *entry = record.clone();
                Ok(record)
            }
            None => Err(StoreError::NotFound(format!("{} {}", T::ENTITY, id))),
        }
    }

    async fn update_if(&self, record: T, expected: &(dyn for<'a> Fn(&'a T) -> bool + Send + Sync)) -> StoreResult<T> {
        self.gate().await?;
        let id = record.id();
        // The entry guard holds the shard lock between the check and the write.
        match self.records.get_mut(&id) {
            Some(mut entry) if expected(entry.value()) => {
                *entry = record.clone();
                Ok(record)
            }
            Some(_) => Err(StoreError::Stale(format!("{} {}", T::ENTITY, id))),
            None => Err(StoreError::NotFound(format!("{} {}", T::ENTITY, id))),
        }
    }

    async fn is_provisioned(&self) -> bool {
        self.provisioned.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SEQUENCES
// ============================================================================

/// Named monotonically increasing counters (e.g. discharge numbers)
#[async_trait]
pub trait SequenceService: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn next_value(&self, name: &str) -> StoreResult<u64>;
}

pub struct InMemorySequence {
    counters: DashMap<String, u64>,
    available: AtomicBool,
    failing: AtomicBool,
}

impl InMemorySequence {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Keep answering the probe but fail every increment.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for InMemorySequence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SequenceService for InMemorySequence {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn next_value(&self, name: &str) -> StoreResult<u64> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("sequence {} is not provisioned", name)));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("sequence {} could not be incremented", name)));
        }

        let mut counter = self.counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

// ============================================================================
// STORE BUNDLE
// ============================================================================

/// The repositories the billing engine reads and writes, plus the lock set
/// every engine component working on them shares
#[derive(Clone)]
pub struct HospitalStore {
    pub admissions: Arc<dyn Repository<Admission>>,
    pub patients: Arc<dyn Repository<Patient>>,
    pub doctors: Arc<dyn Repository<Doctor>>,
    pub rooms: Arc<dyn Repository<Room>>,
    pub lab_orders: Arc<dyn Repository<LabOrder>>,
    pub treatments: Arc<dyn Repository<Treatment>>,
    pub observations: Arc<dyn Repository<NicuObservation>>,
    pub discharges: Arc<dyn Repository<DischargeRecord>>,
    pub sequence: Option<Arc<dyn SequenceService>>,
    pub locks: KeyedLocks,
}

/// Concrete in-memory handles behind a [`HospitalStore`], kept so tests and
/// development tooling can seed data and inject faults.
#[derive(Clone, Default)]
pub struct InMemoryHospital {
    pub admissions: Arc<InMemoryRepository<Admission>>,
    pub patients: Arc<InMemoryRepository<Patient>>,
    pub doctors: Arc<InMemoryRepository<Doctor>>,
    pub rooms: Arc<InMemoryRepository<Room>>,
    pub lab_orders: Arc<InMemoryRepository<LabOrder>>,
    pub treatments: Arc<InMemoryRepository<Treatment>>,
    pub observations: Arc<InMemoryRepository<NicuObservation>>,
    pub discharges: Arc<InMemoryRepository<DischargeRecord>>,
    pub sequence: Arc<InMemorySequence>,
    pub locks: KeyedLocks,
}

impl InMemoryHospital {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> HospitalStore {
        HospitalStore {
            admissions: self.admissions.clone(),
            patients: self.patients.clone(),
            doctors: self.doctors.clone(),
            rooms: self.rooms.clone(),
            lab_orders: self.lab_orders.clone(),
            treatments: self.treatments.clone(),
            observations: self.observations.clone(),
            discharges: self.discharges.clone(),
            sequence: Some(self.sequence.clone()),
            locks: self.locks.clone(),
        }
    }

    pub fn lab_order(&self, patient_id: Uuid, test_name: &str, amount: rust_decimal::Decimal, ordered_at: DateTime<Utc>) -> LabOrder {
        self.lab_orders.seed(LabOrder {
            id: Uuid::new_v4(),
            patient_id,
            test_name: test_name.to_string(),
            amount,
            ordered_at,
        })
    }

    pub fn treatment(&self, patient_id: Uuid, description: &str, amount: rust_decimal::Decimal, performed_at: DateTime<Utc>) -> Treatment {
        self.treatments.seed(Treatment {
            id: Uuid::new_v4(),
            patient_id,
            description: description.to_string(),
            amount,
            performed_at,
        })
    }
}
