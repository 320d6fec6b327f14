//! NICU metering.
//!
//! An observation session is `Active` while `ended_at` is unset and becomes
//! `Closed` exactly once through [`NicuMeter::end`]. Both states are billed by
//! the same formula: whole hours rounded up, never less than one.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::locks::KeyedLocks;
use crate::models::{NicuObservation, ObservationPaymentStatus, RoomType};
use crate::store::{get_required, HospitalStore, ObservationFilter, RoomFilter};

/// Billed hours and charge for a session at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterReading {
    pub hours: i64,
    pub charge: Decimal,
}

/// `ceil((as_of - start) / 1h)`, floored to one hour.
pub fn billable_hours(started_at: DateTime<Utc>, as_of: DateTime<Utc>) -> i64 {
    let elapsed = as_of - started_at;
    let whole = elapsed.num_hours();
    let hours = if elapsed > Duration::hours(whole) { whole + 1 } else { whole };
    hours.max(1)
}

/// Live or final charge of an observation as of `as_of`.
pub fn elapsed_charge(observation: &NicuObservation, as_of: DateTime<Utc>) -> MeterReading {
    let hours = billable_hours(observation.started_at, as_of);
    MeterReading {
        hours,
        charge: Decimal::from(hours) * observation.hourly_rate,
    }
}

/// The amount an observation contributes to a bill right now: the persisted
/// final values when closed, a non-persisted estimate when still active.
pub fn current_reading(observation: &NicuObservation, now: DateTime<Utc>) -> MeterReading {
    match (observation.ended_at, observation.hours_charged, observation.total_charge) {
        (Some(_), Some(hours), Some(charge)) => MeterReading { hours, charge },
        (Some(ended_at), _, _) => elapsed_charge(observation, ended_at),
        (None, _, _) => elapsed_charge(observation, now),
    }
}

/// Starts, meters and closes NICU observation sessions
pub struct NicuMeter {
    store: HospitalStore,
    config: Arc<BillingConfig>,
    locks: KeyedLocks,
}

impl NicuMeter {
    pub fn new(store: HospitalStore, config: Arc<BillingConfig>) -> Self {
        Self {
            locks: store.locks.clone(),
            store,
            config,
        }
    }

    /// Open a session for `subject_id` starting now.
    pub async fn start(
        &self,
        subject_id: Uuid,
        admission_id: Option<Uuid>,
        vitals: serde_json::Value,
    ) -> BillingResult<NicuObservation> {
        self.start_at(subject_id, admission_id, vitals, Utc::now()).await
    }

    #[instrument(skip(self, vitals))]
    pub async fn start_at(
        &self,
        subject_id: Uuid,
        admission_id: Option<Uuid>,
        vitals: serde_json::Value,
        started_at: DateTime<Utc>,
    ) -> BillingResult<NicuObservation> {
        if self.store.patients.get_by_id(subject_id).await?.is_none() {
            return Err(BillingError::Validation(format!("NICU subject {} is not a registered patient", subject_id)));
        }

        let hourly_rate = self.current_hourly_rate().await;

        let observation = NicuObservation {
            id: Uuid::new_v4(),
            subject_id,
            admission_id,
            started_at,
            ended_at: None,
            hourly_rate,
            hours_charged: None,
            total_charge: None,
            payment_status: ObservationPaymentStatus::Pending,
            vitals,
        };

        let observation = self.store.observations.create(observation).await?;
        info!(observation_id = %observation.id, %hourly_rate, "NICU observation started");
        Ok(observation)
    }

    /// Close a session now.
    pub async fn end(&self, observation_id: Uuid) -> BillingResult<MeterReading> {
        self.end_at(observation_id, Utc::now()).await
    }

    /// Close a session at `as_of`. A session can only be closed once.
    #[instrument(skip(self))]
    pub async fn end_at(&self, observation_id: Uuid, as_of: DateTime<Utc>) -> BillingResult<MeterReading> {
        let _guard = self.locks.acquire(observation_id).await;

        let mut observation = get_required(self.store.observations.as_ref(), observation_id).await?;
        if let Some(ended_at) = observation.ended_at {
            warn!(%observation_id, %ended_at, "rejected end of a closed NICU observation");
            return Err(BillingError::Conflict(format!(
                "NICU observation {} was already closed at {}",
                observation_id, ended_at
            )));
        }
        if as_of < observation.started_at {
            return Err(BillingError::Validation(format!(
                "NICU observation {} cannot end at {} before it started at {}",
                observation_id, as_of, observation.started_at
            )));
        }

        let reading = elapsed_charge(&observation, as_of);
        observation.ended_at = Some(as_of);
        observation.hours_charged = Some(reading.hours);
        observation.total_charge = Some(reading.charge);
        self.store.observations.update(observation).await?;

        info!(%observation_id, hours = reading.hours, charge = %reading.charge, "NICU observation closed");
        Ok(reading)
    }

    /// Replace the vitals/notes of an active session.
    #[instrument(skip(self, vitals))]
    pub async fn record_vitals(&self, observation_id: Uuid, vitals: serde_json::Value) -> BillingResult<NicuObservation> {
        let _guard = self.locks.acquire(observation_id).await;

        let mut observation = get_required(self.store.observations.as_ref(), observation_id).await?;
        if !observation.is_active() {
            return Err(BillingError::Conflict(format!(
                "NICU observation {} is closed; vitals can no longer change",
                observation_id
            )));
        }

        observation.vitals = vitals;
        Ok(self.store.observations.update(observation).await?)
    }

    /// Active sessions of a subject with their live estimates.
    pub async fn active_for_subject(
        &self,
        subject_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> BillingResult<Vec<(NicuObservation, MeterReading)>> {
        let mut sessions = self
            .store
            .observations
            .query(&ObservationFilter {
                subject_id: Some(subject_id),
                active_only: true,
                ..Default::default()
            })
            .await?;
        sessions.sort_by_key(|o| o.started_at);

        Ok(sessions
            .into_iter()
            .map(|o| {
                let reading = elapsed_charge(&o, as_of);
                (o, reading)
            })
            .collect())
    }

    /// Hourly rate snapshotted into new sessions.
    async fn current_hourly_rate(&self) -> Decimal {
        let filter = RoomFilter {
            room_type: Some(RoomType::Nicu),
        };
        match self.store.rooms.query(&filter).await {
            Ok(mut rooms) => {
                rooms.sort_by(|a, b| a.room_number.cmp(&b.room_number));
                rooms
                    .iter()
                    .find_map(|room| room.hourly_rate)
                    .unwrap_or(self.config.default_nicu_hourly_rate)
            }
            Err(e) => {
                warn!(error = %e, "NICU room rate lookup failed, using default rate");
                self.config.default_nicu_hourly_rate
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Gender, Patient, Room};
    use crate::store::{InMemoryHospital, Repository};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    fn setup() -> (InMemoryHospital, NicuMeter, Patient) {
        let hospital = InMemoryHospital::new();
        let meter = NicuMeter::new(hospital.store(), Arc::new(BillingConfig::default()));
        let baby = hospital.patients.seed(Patient::new("Baby Okafor", Gender::Female));
        (hospital, meter, baby)
    }

    #[test]
    fn test_partial_hour_rounds_up() {
        assert_eq!(billable_hours(at(10, 0, 0), at(10, 45, 0)), 1);
        assert_eq!(billable_hours(at(10, 0, 0), at(11, 15, 0)), 2);
        assert_eq!(billable_hours(at(10, 0, 0), at(11, 0, 0)), 1);
        assert_eq!(billable_hours(at(10, 0, 0), at(11, 0, 3)), 2);
    }

    #[test]
    fn test_sub_second_remainder_starts_a_new_hour() {
        let start = at(10, 0, 0);
        assert_eq!(billable_hours(start, start + Duration::hours(1)), 1);
        assert_eq!(billable_hours(start, start + Duration::hours(1) + Duration::milliseconds(1)), 2);
        assert_eq!(billable_hours(start, start + Duration::hours(1) + Duration::milliseconds(500)), 2);
        assert_eq!(billable_hours(start, start + Duration::nanoseconds(1)), 1);
    }

    #[test]
    fn test_minimum_one_hour() {
        assert_eq!(billable_hours(at(10, 0, 0), at(10, 0, 0)), 1);
        assert_eq!(billable_hours(at(10, 0, 0), at(9, 0, 0)), 1);
    }

    #[tokio::test]
    async fn test_end_closes_session_once() {
        let (hospital, meter, baby) = setup();
        let obs = meter
            .start_at(baby.id, None, serde_json::json!({"spo2": 97}), at(10, 0, 0))
            .await
            .unwrap();
        assert_eq!(obs.hourly_rate, Decimal::from(500));

        let reading = meter.end_at(obs.id, at(10, 45, 0)).await.unwrap();
        assert_eq!(reading, MeterReading { hours: 1, charge: Decimal::from(500) });

        let stored = hospital.observations.get_by_id(obs.id).await.unwrap().unwrap();
        assert_eq!(stored.ended_at, Some(at(10, 45, 0)));
        assert_eq!(stored.hours_charged, Some(1));
        assert_eq!(stored.total_charge, Some(Decimal::from(500)));

        let again = meter.end_at(obs.id, at(12, 0, 0)).await;
        assert!(matches!(again, Err(BillingError::Conflict(_))));
        let unchanged = hospital.observations.get_by_id(obs.id).await.unwrap().unwrap();
        assert_eq!(unchanged, stored);
    }

    #[tokio::test]
    async fn test_end_before_start_is_rejected() {
        let (hospital, meter, baby) = setup();
        let obs = meter.start_at(baby.id, None, serde_json::Value::Null, at(10, 0, 0)).await.unwrap();

        let result = meter.end_at(obs.id, at(9, 59, 0)).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));

        let stored = hospital.observations.get_by_id(obs.id).await.unwrap().unwrap();
        assert!(stored.is_active());
        assert_eq!(stored.hours_charged, None);
    }

    #[tokio::test]
    async fn test_rate_snapshot_from_nicu_room() {
        let (hospital, meter, baby) = setup();
        let mut nicu = Room::new("N-1", RoomType::Nicu, Decimal::from(8000), 4);
        nicu.hourly_rate = Some(Decimal::from(750));
        hospital.rooms.seed(nicu.clone());

        let obs = meter.start_at(baby.id, None, serde_json::Value::Null, at(10, 0, 0)).await.unwrap();
        assert_eq!(obs.hourly_rate, Decimal::from(750));

        // A later rate change does not affect the running session.
        nicu.hourly_rate = Some(Decimal::from(900));
        hospital.rooms.seed(nicu);
        let reading = meter.end_at(obs.id, at(11, 15, 0)).await.unwrap();
        assert_eq!(reading.charge, Decimal::from(1500));
    }

    #[tokio::test]
    async fn test_unknown_subject_is_rejected() {
        let (hospital, meter, _) = setup();
        let result = meter.start(Uuid::new_v4(), None, serde_json::Value::Null).await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert!(hospital.observations.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_end_has_one_winner() {
        let (_hospital, meter, baby) = setup();
        let meter = Arc::new(meter);
        let obs = meter.start_at(baby.id, None, serde_json::Value::Null, at(8, 0, 0)).await.unwrap();

        let mut handles = Vec::new();
        for minute in 0..6 {
            let meter = meter.clone();
            handles.push(tokio::spawn(async move { meter.end_at(obs.id, at(9, minute * 5, 0)).await }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(BillingError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!((winners, conflicts), (1, 5));
    }

    #[tokio::test]
    async fn test_vitals_frozen_after_close() {
        let (_hospital, meter, baby) = setup();
        let obs = meter.start_at(baby.id, None, serde_json::Value::Null, at(10, 0, 0)).await.unwrap();

        let updated = meter
            .record_vitals(obs.id, serde_json::json!({"temp_c": 36.8}))
            .await
            .unwrap();
        assert_eq!(updated.vitals["temp_c"], 36.8);

        meter.end_at(obs.id, at(10, 30, 0)).await.unwrap();
        let late = meter.record_vitals(obs.id, serde_json::json!({"temp_c": 37.0})).await;
        assert!(matches!(late, Err(BillingError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_active_sessions_carry_live_estimate() {
        let (_hospital, meter, baby) = setup();
        let open = meter.start_at(baby.id, None, serde_json::Value::Null, at(6, 0, 0)).await.unwrap();
        let closed = meter.start_at(baby.id, None, serde_json::Value::Null, at(7, 0, 0)).await.unwrap();
        meter.end_at(closed.id, at(8, 0, 0)).await.unwrap();

        let active = meter.active_for_subject(baby.id, at(9, 30, 0)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0.id, open.id);
        assert_eq!(active[0].1, MeterReading { hours: 4, charge: Decimal::from(2000) });
    }

    #[test]
    fn test_current_reading_prefers_persisted_values() {
        let obs = NicuObservation {
            id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            admission_id: None,
            started_at: at(10, 0, 0),
            ended_at: Some(at(11, 15, 0)),
            hourly_rate: Decimal::from(500),
            hours_charged: Some(2),
            total_charge: Some(Decimal::from(1000)),
            payment_status: ObservationPaymentStatus::Pending,
            vitals: serde_json::Value::Null,
        };
        let reading = current_reading(&obs, at(23, 0, 0));
        assert_eq!(reading, MeterReading { hours: 2, charge: Decimal::from(1000) });
    }

    proptest! {
        #[test]
        fn prop_hours_at_least_one_and_charge_consistent(
            elapsed_ms in -7_200_000i64..400_000_000,
            rate_cents in 0i64..1_000_000,
        ) {
            let start = at(0, 0, 0);
            let obs = NicuObservation {
                id: Uuid::nil(),
                subject_id: Uuid::nil(),
                admission_id: None,
                started_at: start,
                ended_at: None,
                hourly_rate: Decimal::new(rate_cents, 2),
                hours_charged: None,
                total_charge: None,
                payment_status: ObservationPaymentStatus::Pending,
                vitals: serde_json::Value::Null,
            };
            let elapsed = Duration::milliseconds(elapsed_ms);
            let reading = elapsed_charge(&obs, start + elapsed);
            prop_assert!(reading.hours >= 1);
            prop_assert_eq!(reading.charge, Decimal::from(reading.hours) * obs.hourly_rate);
            prop_assert!(Duration::hours(reading.hours) >= elapsed);
            prop_assert!(reading.hours == 1 || Duration::hours(reading.hours - 1) < elapsed);
        }
    }
}
