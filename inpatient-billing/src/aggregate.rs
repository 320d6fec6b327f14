//! Pure discharge arithmetic: stay length, itemized breakdown, discount and
//! settlement.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::discount::{DiscountOutcome, DiscountPolicy};
use crate::error::{BillingError, BillingResult};
use crate::models::{ChargeBreakdown, ChargeLineItem, ClinicalSummary, DiscountType};
use crate::payment::{PaymentReconciler, Settlement};

/// What the discharging clerk enters on the discharge form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DischargeInputs {
    pub discharged_at: DateTime<Utc>,
    pub medical_charges: Decimal,
    pub medicine_charges: Decimal,
    pub other_charges: Decimal,
    /// Extra itemized charges, billed under "other"
    pub manual_items: Vec<ChargeLineItem>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub additional_payment: Decimal,
    pub summary: ClinicalSummary,
}

impl DischargeInputs {
    /// No manual charges, no discount, no additional payment.
    pub fn new(discharged_at: DateTime<Utc>) -> Self {
        Self {
            discharged_at,
            medical_charges: Decimal::ZERO,
            medicine_charges: Decimal::ZERO,
            other_charges: Decimal::ZERO,
            manual_items: Vec::new(),
            discount_type: DiscountType::Fixed,
            discount_value: Decimal::ZERO,
            additional_payment: Decimal::ZERO,
            summary: ClinicalSummary::default(),
        }
    }

    pub fn validate(&self, admitted_at: DateTime<Utc>) -> BillingResult<()> {
        if self.discharged_at < admitted_at {
            return Err(BillingError::Validation(format!(
                "discharge date {} is before admission date {}",
                self.discharged_at, admitted_at
            )));
        }

        let amounts = [
            ("medical charges", self.medical_charges),
            ("medicine charges", self.medicine_charges),
            ("other charges", self.other_charges),
            ("discount value", self.discount_value),
            ("additional payment", self.additional_payment),
        ];
        for (label, amount) in amounts {
            if amount < Decimal::ZERO {
                return Err(BillingError::Validation(format!("{} cannot be negative, got {}", label, amount)));
            }
        }

        if let Some(item) = self.manual_items.iter().find(|item| item.amount < Decimal::ZERO) {
            return Err(BillingError::Validation(format!(
                "manual charge '{}' cannot be negative, got {}",
                item.description, item.amount
            )));
        }

        Ok(())
    }

    fn manual_total(&self) -> Decimal {
        self.manual_items.iter().map(|item| item.amount).sum()
    }
}

/// Totals going into a breakdown
#[derive(Debug, Clone, PartialEq)]
pub struct BreakdownInput {
    pub room_charges: Decimal,
    pub lab_total: Decimal,
    pub treatment_total: Decimal,
    pub nicu_total: Decimal,
    pub medical_charges: Decimal,
    pub medicine_charges: Decimal,
    pub other_charges: Decimal,
    pub manual_total: Decimal,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub deposit: Decimal,
    pub additional_payment: Decimal,
}

impl BreakdownInput {
    /// Combine the form inputs with the computed and collected totals.
    pub fn from_inputs(
        inputs: &DischargeInputs,
        room_charges: Decimal,
        lab_total: Decimal,
        treatment_total: Decimal,
        nicu_total: Decimal,
        deposit: Decimal,
    ) -> Self {
        Self {
            room_charges,
            lab_total,
            treatment_total,
            nicu_total,
            medical_charges: inputs.medical_charges,
            medicine_charges: inputs.medicine_charges,
            other_charges: inputs.other_charges,
            manual_total: inputs.manual_total(),
            discount_type: inputs.discount_type,
            discount_value: inputs.discount_value,
            deposit,
            additional_payment: inputs.additional_payment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown {
    pub charges: ChargeBreakdown,
    pub subtotal: Decimal,
    pub discount: DiscountOutcome,
    pub settlement: Settlement,
}

pub fn compute_breakdown(input: &BreakdownInput) -> BillingResult<Breakdown> {
    let charges = ChargeBreakdown {
        room: input.room_charges,
        lab: input.lab_total,
        treatment: input.treatment_total,
        nicu: input.nicu_total,
        medical: input.medical_charges,
        medicine: input.medicine_charges,
        other: input.other_charges + input.manual_total,
    };
    let subtotal = charges.subtotal();

    let discount = DiscountPolicy::apply(subtotal, input.discount_type, input.discount_value)?;
    let settlement = PaymentReconciler::reconcile(discount.final_total, input.deposit, input.additional_payment)?;

    Ok(Breakdown {
        charges,
        subtotal,
        discount,
        settlement,
    })
}

/// Days billed for a stay: whole days rounded up, at least one.
pub fn stay_days(admitted_at: DateTime<Utc>, discharged_at: DateTime<Utc>) -> i64 {
    let stay = discharged_at - admitted_at;
    let whole = stay.num_days();
    let days = if stay > Duration::days(whole) { whole + 1 } else { whole };
    days.max(1)
}

pub fn room_charges(stay_days: i64, rate_per_day: Decimal) -> Decimal {
    Decimal::from(stay_days) * rate_per_day
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentStatus;
    use chrono::TimeZone;

    fn date(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    fn input() -> BreakdownInput {
        BreakdownInput {
            room_charges: Decimal::from(2000),
            lab_total: Decimal::from(300),
            treatment_total: Decimal::from(400),
            nicu_total: Decimal::from(1000),
            medical_charges: Decimal::from(200),
            medicine_charges: Decimal::from(600),
            other_charges: Decimal::from(300),
            manual_total: Decimal::from(200),
            discount_type: DiscountType::Percentage,
            discount_value: Decimal::from(10),
            deposit: Decimal::from(2000),
            additional_payment: Decimal::from(3000),
        }
    }

    #[test]
    fn test_two_day_stay_room_charges() {
        let days = stay_days(date(1, 0), date(3, 0));
        assert_eq!(days, 2);
        assert_eq!(room_charges(days, Decimal::from(1000)), Decimal::from(2000));
    }

    #[test]
    fn test_same_day_discharge_bills_one_day() {
        assert_eq!(stay_days(date(1, 9), date(1, 17)), 1);
        assert_eq!(stay_days(date(1, 9), date(1, 9)), 1);
        assert_eq!(stay_days(date(1, 9), date(2, 10)), 2);
    }

    #[test]
    fn test_fraction_of_a_second_past_a_day_bills_another_day() {
        let admitted = date(1, 9);
        assert_eq!(stay_days(admitted, admitted + Duration::days(1)), 1);
        assert_eq!(stay_days(admitted, admitted + Duration::days(1) + Duration::milliseconds(1)), 2);
        assert_eq!(stay_days(admitted, admitted + Duration::days(1) + Duration::milliseconds(500)), 2);
    }

    #[test]
    fn test_breakdown_sums_every_category() {
        let breakdown = compute_breakdown(&input()).unwrap();

        assert_eq!(breakdown.charges.other, Decimal::from(500));
        assert_eq!(breakdown.subtotal, Decimal::from(5000));
        assert_eq!(breakdown.discount.discount_amount, Decimal::from(500));
        assert_eq!(breakdown.discount.final_total, Decimal::from(4500));
        assert_eq!(breakdown.settlement.refund_amount, Decimal::from(500));
        assert_eq!(breakdown.settlement.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_inputs_reject_negative_and_backdated_values() {
        let admitted = date(2, 0);

        let backdated = DischargeInputs::new(date(1, 0));
        assert!(matches!(backdated.validate(admitted), Err(BillingError::Validation(_))));

        let negative_medicine = DischargeInputs {
            medicine_charges: Decimal::from(-5),
            ..DischargeInputs::new(date(3, 0))
        };
        assert!(negative_medicine.validate(admitted).is_err());

        let negative_item = DischargeInputs {
            manual_items: vec![ChargeLineItem::manual("Ambulance", Decimal::from(-100))],
            ..DischargeInputs::new(date(3, 0))
        };
        assert!(negative_item.validate(admitted).is_err());

        assert!(DischargeInputs::new(date(3, 0)).validate(admitted).is_ok());
    }

    #[test]
    fn test_manual_items_are_billed_as_other() {
        let inputs = DischargeInputs {
            other_charges: Decimal::from(50),
            manual_items: vec![
                ChargeLineItem::manual("Ambulance", Decimal::from(700)),
                ChargeLineItem::manual("Attendant bed", Decimal::from(250)),
            ],
            ..DischargeInputs::new(date(3, 0))
        };
        let input = BreakdownInput::from_inputs(
            &inputs,
            Decimal::from(1000),
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
        );
        let breakdown = compute_breakdown(&input).unwrap();
        assert_eq!(breakdown.charges.other, Decimal::from(1000));
        assert_eq!(breakdown.subtotal, Decimal::from(2000));
        assert_eq!(breakdown.settlement.balance_due, Decimal::from(2000));
        assert_eq!(breakdown.settlement.payment_status, PaymentStatus::Pending);
    }
}
