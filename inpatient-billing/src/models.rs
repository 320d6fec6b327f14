use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ADMISSIONS
// ============================================================================

/// Admission lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionStatus {
    Active,
    Discharged,
    Cancelled,
}

impl fmt::Display for AdmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AdmissionStatus::Active => "active",
            AdmissionStatus::Discharged => "discharged",
            AdmissionStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// One inpatient stay, from check-in to discharge or cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub admitted_at: DateTime<Utc>,
    pub deposit: Decimal,
    pub status: AdmissionStatus,
    pub discharge_id: Option<String>,
    pub discharged_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl Admission {
    pub fn new(patient_id: Uuid, doctor_id: Uuid, room_id: Uuid, admitted_at: DateTime<Utc>, deposit: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: Some(patient_id),
            doctor_id: Some(doctor_id),
            room_id: Some(room_id),
            admitted_at,
            deposit,
            status: AdmissionStatus::Active,
            discharge_id: None,
            discharged_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AdmissionStatus::Active
    }
}

// ============================================================================
// PEOPLE & ROOMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub gender: Gender,
    pub is_newborn: bool,
    /// Set on baby patients registered against their mother's record
    pub mother_id: Option<Uuid>,
}

impl Patient {
    pub fn new(name: impl Into<String>, gender: Gender) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            phone: None,
            gender,
            is_newborn: false,
            mother_id: None,
        }
    }

    pub fn newborn_of(name: impl Into<String>, gender: Gender, mother_id: Uuid) -> Self {
        Self {
            is_newborn: true,
            mother_id: Some(mother_id),
            ..Self::new(name, gender)
        }
    }

    /// Whether baby patients may be linked to this patient.
    pub fn may_have_linked_babies(&self) -> bool {
        self.gender == Gender::Female || self.is_newborn
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub department: Option<String>,
}

impl Doctor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            department: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    General,
    SemiPrivate,
    Private,
    Icu,
    Nicu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub room_number: String,
    pub room_type: RoomType,
    pub rate_per_day: Decimal,
    /// Metered rate, only meaningful for NICU rooms
    pub hourly_rate: Option<Decimal>,
    pub total_beds: u32,
    pub occupied_beds: u32,
}

impl Room {
    pub fn new(room_number: impl Into<String>, room_type: RoomType, rate_per_day: Decimal, total_beds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_number: room_number.into(),
            room_type,
            rate_per_day,
            hourly_rate: None,
            total_beds,
            occupied_beds: 0,
        }
    }

    pub fn label(&self) -> String {
        format!("{} ({:?})", self.room_number, self.room_type)
    }
}

// ============================================================================
// CHARGE-BEARING RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabOrder {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub test_name: String,
    pub amount: Decimal,
    pub ordered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub performed_at: DateTime<Utc>,
}

/// Subsystem a charge line was contributed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeSource {
    Lab,
    Treatment,
    Nicu,
    Manual,
}

impl fmt::Display for ChargeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChargeSource::Lab => "lab",
            ChargeSource::Treatment => "treatment",
            ChargeSource::Nicu => "nicu",
            ChargeSource::Manual => "manual",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeLineItem {
    pub source: ChargeSource,
    pub description: String,
    pub amount: Decimal,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Originating baby for NICU items billed to the mother
    pub tag: Option<String>,
}

impl ChargeLineItem {
    pub fn manual(description: impl Into<String>, amount: Decimal) -> Self {
        Self {
            source: ChargeSource::Manual,
            description: description.into(),
            amount,
            occurred_at: None,
            tag: None,
        }
    }
}

impl From<&LabOrder> for ChargeLineItem {
    fn from(order: &LabOrder) -> Self {
        Self {
            source: ChargeSource::Lab,
            description: order.test_name.clone(),
            amount: order.amount,
            occurred_at: Some(order.ordered_at),
            tag: None,
        }
    }
}

impl From<&Treatment> for ChargeLineItem {
    fn from(treatment: &Treatment) -> Self {
        Self {
            source: ChargeSource::Treatment,
            description: treatment.description.clone(),
            amount: treatment.amount,
            occurred_at: Some(treatment.performed_at),
            tag: None,
        }
    }
}

// ============================================================================
// NICU OBSERVATIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationPaymentStatus {
    Pending,
    Paid,
}

/// One hourly-metered NICU care session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicuObservation {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub admission_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub hourly_rate: Decimal,
    pub hours_charged: Option<i64>,
    pub total_charge: Option<Decimal>,
    pub payment_status: ObservationPaymentStatus,
    pub vitals: serde_json::Value,
}

impl NicuObservation {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

// ============================================================================
// DISCHARGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Partial,
    Pending,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Pending => "pending",
        };
        f.write_str(label)
    }
}

/// How a discharge identifier was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierSource {
    Sequence,
    Fallback,
}

/// Itemized totals per charge category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeBreakdown {
    pub room: Decimal,
    pub lab: Decimal,
    pub treatment: Decimal,
    pub nicu: Decimal,
    pub medical: Decimal,
    pub medicine: Decimal,
    pub other: Decimal,
}

impl ChargeBreakdown {
    pub fn subtotal(&self) -> Decimal {
        self.room + self.lab + self.treatment + self.nicu + self.medical + self.medicine + self.other
    }
}

/// Free-text closing summary printed on the discharge sheet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalSummary {
    pub diagnosis: Option<String>,
    pub condition_at_discharge: Option<String>,
    pub follow_up: Option<String>,
}

/// The finalized bill for one admission. Never recomputed once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DischargeRecord {
    pub id: Uuid,
    pub discharge_id: String,
    pub identifier_source: IdentifierSource,
    pub admission_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub room_id: Uuid,
    pub admitted_at: DateTime<Utc>,
    pub discharged_at: DateTime<Utc>,
    pub stay_days: i64,
    pub breakdown: ChargeBreakdown,
    pub lab_items: Vec<ChargeLineItem>,
    pub treatment_items: Vec<ChargeLineItem>,
    pub nicu_items: Vec<ChargeLineItem>,
    pub manual_items: Vec<ChargeLineItem>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub subtotal: Decimal,
    pub final_total: Decimal,
    pub deposit: Decimal,
    pub additional_payment: Decimal,
    pub total_paid: Decimal,
    pub balance_due: Decimal,
    pub refund_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub summary: ClinicalSummary,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakdown_subtotal_sums_every_category() {
        let breakdown = ChargeBreakdown {
            room: Decimal::from(2000),
            lab: Decimal::from(350),
            treatment: Decimal::from(400),
            nicu: Decimal::from(1500),
            medical: Decimal::from(100),
            medicine: Decimal::from(250),
            other: Decimal::from(50),
        };
        assert_eq!(breakdown.subtotal(), Decimal::from(4650));
    }

    #[test]
    fn test_linked_baby_eligibility() {
        let mother = Patient::new("Amina Bello", Gender::Female);
        let father = Patient::new("Tunde Bello", Gender::Male);
        let baby = Patient::newborn_of("Baby Bello", Gender::Male, mother.id);

        assert!(mother.may_have_linked_babies());
        assert!(!father.may_have_linked_babies());
        assert!(baby.may_have_linked_babies());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&PaymentStatus::Partial).unwrap(), "\"partial\"");
        assert_eq!(serde_json::to_string(&AdmissionStatus::Discharged).unwrap(), "\"discharged\"");
        assert_eq!(serde_json::to_string(&RoomType::Nicu).unwrap(), "\"nicu\"");
    }
}
