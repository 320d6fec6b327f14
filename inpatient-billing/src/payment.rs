use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::models::PaymentStatus;

/// Settlement of a final total against what the patient has paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub total_paid: Decimal,
    pub balance_due: Decimal,
    pub refund_amount: Decimal,
    pub payment_status: PaymentStatus,
}

/// Reconciles deposit and additional payment against the discounted total
pub struct PaymentReconciler;

impl PaymentReconciler {
    pub fn reconcile(final_total: Decimal, deposit: Decimal, additional_payment: Decimal) -> BillingResult<Settlement> {
        for (label, amount) in [("deposit", deposit), ("additional payment", additional_payment)] {
            if amount < Decimal::ZERO {
                return Err(BillingError::Validation(format!("{} cannot be negative, got {}", label, amount)));
            }
        }

        let total_paid = deposit + additional_payment;
        let diff = final_total - total_paid;

        let (balance_due, refund_amount) = if diff > Decimal::ZERO {
            (diff, Decimal::ZERO)
        } else if diff < Decimal::ZERO {
            (Decimal::ZERO, -diff)
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        let payment_status = if diff <= Decimal::ZERO {
            PaymentStatus::Paid
        } else if additional_payment > Decimal::ZERO {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        };

        Ok(Settlement {
            total_paid,
            balance_due,
            refund_amount,
            payment_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_overpayment_is_refunded() {
        let s = PaymentReconciler::reconcile(Decimal::from(4500), Decimal::from(2000), Decimal::from(3000)).unwrap();
        assert_eq!(s.total_paid, Decimal::from(5000));
        assert_eq!(s.refund_amount, Decimal::from(500));
        assert_eq!(s.balance_due, Decimal::ZERO);
        assert_eq!(s.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_deposit_only_leaves_pending_balance() {
        let s = PaymentReconciler::reconcile(Decimal::from(4500), Decimal::from(1000), Decimal::ZERO).unwrap();
        assert_eq!(s.balance_due, Decimal::from(3500));
        assert_eq!(s.refund_amount, Decimal::ZERO);
        assert_eq!(s.payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn test_additional_payment_short_of_total_is_partial() {
        let s = PaymentReconciler::reconcile(Decimal::from(4500), Decimal::from(1000), Decimal::from(500)).unwrap();
        assert_eq!(s.balance_due, Decimal::from(3000));
        assert_eq!(s.payment_status, PaymentStatus::Partial);
    }

    #[test]
    fn test_exact_settlement() {
        let s = PaymentReconciler::reconcile(Decimal::from(3000), Decimal::from(3000), Decimal::ZERO).unwrap();
        assert_eq!((s.balance_due, s.refund_amount), (Decimal::ZERO, Decimal::ZERO));
        assert_eq!(s.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_negative_payment_is_rejected() {
        let result = PaymentReconciler::reconcile(Decimal::from(3000), Decimal::from(-10), Decimal::ZERO);
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    proptest! {
        #[test]
        fn prop_settlement_balances(
            total_cents in 0i64..50_000_000,
            deposit_cents in 0i64..50_000_000,
            extra_cents in 0i64..50_000_000,
        ) {
            let final_total = Decimal::new(total_cents, 2);
            let deposit = Decimal::new(deposit_cents, 2);
            let extra = Decimal::new(extra_cents, 2);
            let s = PaymentReconciler::reconcile(final_total, deposit, extra).unwrap();

            prop_assert!(s.balance_due.is_zero() || s.refund_amount.is_zero());
            prop_assert!(s.balance_due >= Decimal::ZERO && s.refund_amount >= Decimal::ZERO);
            prop_assert_eq!(final_total, deposit + extra + s.balance_due - s.refund_amount);
        }
    }
}
