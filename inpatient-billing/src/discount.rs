use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::models::DiscountType;

/// Discount applied to a subtotal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountOutcome {
    pub discount_amount: Decimal,
    pub final_total: Decimal,
}

/// Percentage-or-fixed discount, capped at the subtotal
pub struct DiscountPolicy;

impl DiscountPolicy {
    pub fn apply(subtotal: Decimal, kind: DiscountType, value: Decimal) -> BillingResult<DiscountOutcome> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(BillingError::Validation(format!("discount value cannot be negative, got {}", value)));
        }
        if subtotal.is_sign_negative() && !subtotal.is_zero() {
            return Err(BillingError::Validation(format!("subtotal cannot be negative, got {}", subtotal)));
        }

        let requested = match kind {
            DiscountType::Percentage => {
                (subtotal * value / Decimal::ONE_HUNDRED).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            }
            DiscountType::Fixed => value,
        };

        let discount_amount = requested.min(subtotal);

        Ok(DiscountOutcome {
            discount_amount,
            final_total: subtotal - discount_amount,
        })
    }
}
