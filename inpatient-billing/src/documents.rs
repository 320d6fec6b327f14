//! Discharge documents.
//!
//! The engine hands a [`DischargeDocument`] with pre-formatted amounts to a
//! [`DocumentRenderer`]; what the renderer produces (PDF, HTML, a print job)
//! is opaque to billing.

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::models::{ChargeLineItem, ClinicalSummary, DischargeRecord, IdentifierSource};

pub trait CurrencyFormatter: Send + Sync {
    fn format(&self, amount: Decimal) -> String;
}

/// `Rs. 12,345.60` style amounts: symbol prefix, thousands separators, two
/// decimal places.
#[derive(Debug, Clone)]
pub struct SymbolCurrencyFormatter {
    symbol: String,
}

impl SymbolCurrencyFormatter {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into() }
    }
}

impl CurrencyFormatter for SymbolCurrencyFormatter {
    fn format(&self, amount: Decimal) -> String {
        let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(2);

        let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
        let digits = rounded.abs().to_string();
        let (whole, cents) = digits.split_once('.').unwrap_or((digits.as_str(), "00"));

        format!("{}{} {}.{}", sign, self.symbol, group_thousands(whole), cents)
    }
}

fn group_thousands(whole: &str) -> String {
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentLine {
    pub label: String,
    pub amount: String,
}

/// Everything printed on a discharge sheet, amounts already formatted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DischargeDocument {
    pub discharge_id: String,
    pub provisional_identifier: bool,
    pub patient_name: String,
    pub doctor_name: String,
    pub room: String,
    pub admitted_on: String,
    pub discharged_on: String,
    pub stay_days: i64,
    pub charges: Vec<DocumentLine>,
    pub lab_items: Vec<DocumentLine>,
    pub treatment_items: Vec<DocumentLine>,
    pub nicu_items: Vec<DocumentLine>,
    pub manual_items: Vec<DocumentLine>,
    pub subtotal: String,
    pub discount: String,
    pub final_total: String,
    pub deposit: String,
    pub additional_payment: String,
    pub total_paid: String,
    pub balance_due: String,
    pub refund: String,
    pub payment_status: String,
    pub summary: ClinicalSummary,
}

impl DischargeDocument {
    pub fn build(
        record: &DischargeRecord,
        patient_name: &str,
        doctor_name: &str,
        room: &str,
        formatter: &dyn CurrencyFormatter,
    ) -> Self {
        let line = |label: String, amount: Decimal| DocumentLine {
            label,
            amount: formatter.format(amount),
        };
        let items = |items: &[ChargeLineItem]| -> Vec<DocumentLine> {
            items
                .iter()
                .map(|item| {
                    let label = match &item.tag {
                        Some(tag) => format!("{} [{}]", item.description, tag),
                        None => item.description.clone(),
                    };
                    line(label, item.amount)
                })
                .collect()
        };

        let b = &record.breakdown;
        let room_label = format!("Room charges ({} day{})", record.stay_days, if record.stay_days == 1 { "" } else { "s" });
        let mut charges = vec![line(room_label, b.room)];
        for (label, amount) in [
            ("Laboratory", b.lab),
            ("Treatments", b.treatment),
            ("NICU care", b.nicu),
            ("Medical charges", b.medical),
            ("Medicines", b.medicine),
            ("Other charges", b.other),
        ] {
            if !amount.is_zero() {
                charges.push(line(label.to_string(), amount));
            }
        }

        Self {
            discharge_id: record.discharge_id.clone(),
            provisional_identifier: record.identifier_source == IdentifierSource::Fallback,
            patient_name: patient_name.to_string(),
            doctor_name: doctor_name.to_string(),
            room: room.to_string(),
            admitted_on: record.admitted_at.format("%d %b %Y %H:%M").to_string(),
            discharged_on: record.discharged_at.format("%d %b %Y %H:%M").to_string(),
            stay_days: record.stay_days,
            charges,
            lab_items: items(&record.lab_items),
            treatment_items: items(&record.treatment_items),
            nicu_items: items(&record.nicu_items),
            manual_items: items(&record.manual_items),
            subtotal: formatter.format(record.subtotal),
            discount: formatter.format(record.discount_amount),
            final_total: formatter.format(record.final_total),
            deposit: formatter.format(record.deposit),
            additional_payment: formatter.format(record.additional_payment),
            total_paid: formatter.format(record.total_paid),
            balance_due: formatter.format(record.balance_due),
            refund: formatter.format(record.refund_amount),
            payment_status: record.payment_status.to_string(),
            summary: record.summary.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, document: &DischargeDocument) -> BillingResult<RenderedDocument>;
}

/// Renders the document as pretty-printed JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentRenderer;

#[async_trait]
impl DocumentRenderer for JsonDocumentRenderer {
    async fn render(&self, document: &DischargeDocument) -> BillingResult<RenderedDocument> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| BillingError::DegradedCapability(format!("discharge document serialization failed: {}", e)))?;
        Ok(RenderedDocument {
            content_type: "application/json".to_string(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatter_groups_thousands() {
        let rs = SymbolCurrencyFormatter::new("Rs.");
        assert_eq!(rs.format(Decimal::from(1234567)), "Rs. 1,234,567.00");
        assert_eq!(rs.format(Decimal::new(99950, 2)), "Rs. 999.50");
        assert_eq!(rs.format(Decimal::ZERO), "Rs. 0.00");
        assert_eq!(rs.format(Decimal::new(1000005, 3)), "Rs. 1,000.01");
        assert_eq!(rs.format(Decimal::from(-2500)), "-Rs. 2,500.00");
    }

    #[test]
    fn test_group_thousands_boundaries() {
        assert_eq!(group_thousands("1"), "1");
        assert_eq!(group_thousands("100"), "100");
        assert_eq!(group_thousands("1000"), "1,000");
        assert_eq!(group_thousands("100000"), "100,000");
    }

    #[test]
    fn test_json_renderer_output() {
        let document = DischargeDocument {
            discharge_id: "DIS-000001".to_string(),
            provisional_identifier: false,
            patient_name: "Amina Bello".to_string(),
            doctor_name: "Dr. Okoro".to_string(),
            room: "204 (Private)".to_string(),
            admitted_on: "01 Jan 2024 00:00".to_string(),
            discharged_on: "03 Jan 2024 00:00".to_string(),
            stay_days: 2,
            charges: vec![DocumentLine {
                label: "Room charges (2 days)".to_string(),
                amount: "Rs. 2,000.00".to_string(),
            }],
            lab_items: vec![],
            treatment_items: vec![],
            nicu_items: vec![],
            manual_items: vec![],
            subtotal: "Rs. 2,000.00".to_string(),
            discount: "Rs. 0.00".to_string(),
            final_total: "Rs. 2,000.00".to_string(),
            deposit: "Rs. 2,000.00".to_string(),
            additional_payment: "Rs. 0.00".to_string(),
            total_paid: "Rs. 2,000.00".to_string(),
            balance_due: "Rs. 0.00".to_string(),
            refund: "Rs. 0.00".to_string(),
            payment_status: "paid".to_string(),
            summary: ClinicalSummary::default(),
        };

        let rendered = tokio_test::block_on(JsonDocumentRenderer.render(&document)).unwrap();
        assert_eq!(rendered.content_type, "application/json");
        let value: serde_json::Value = serde_json::from_slice(&rendered.bytes).unwrap();
        assert_eq!(value["discharge_id"], "DIS-000001");
        assert_eq!(value["charges"][0]["amount"], "Rs. 2,000.00");
    }
}
