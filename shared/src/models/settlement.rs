//! Settlement: metal receivables, deposits and sale adjustments

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metal::MetalKind;

/// Payment status of a metal receivable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceivableStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

impl ReceivableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceivableStatus::Pending => "pending",
            ReceivableStatus::PartiallyPaid => "partially_paid",
            ReceivableStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReceivableStatus::Pending),
            "partially_paid" => Some(ReceivableStatus::PartiallyPaid),
            "paid" => Some(ReceivableStatus::Paid),
            _ => None,
        }
    }

    /// Status a receivable lands in after a payment leaves `remaining`
    /// grams outstanding
    pub fn after_payment(remaining: Decimal) -> Self {
        if remaining <= Decimal::ZERO {
            ReceivableStatus::Paid
        } else {
            ReceivableStatus::PartiallyPaid
        }
    }
}

/// A gram obligation a client owes for a sale.
///
/// `remaining_grams` only ever decreases and never goes below zero;
/// currency payments reduce it at the sell price of the payment date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalReceivable {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub metal: MetalKind,
    /// Original obligation in grams
    pub grams: Decimal,
    pub remaining_grams: Decimal,
    pub status: ReceivableStatus,
    /// Human-readable sale reference, e.g. "Sale #123"
    pub sale_reference: Option<String>,
    pub due_date: Option<NaiveDate>,
    /// Extra currency costs attributed to the sale, e.g. shipping
    pub costs: Decimal,
    /// Stamped when the receivable reaches `Paid`
    pub received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One currency payment applied against a receivable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalReceivablePayment {
    pub id: Uuid,
    pub receivable_id: Uuid,
    pub paid_amount: Decimal,
    pub quotation_id: Uuid,
    /// Sell price used for the conversion, frozen at payment time
    pub sell_price_used: Decimal,
    /// Grams the payment bought, before clamping to the remainder
    pub grams_credited: Decimal,
    pub payment_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// A client's currency deposit converted to account grams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalDeposit {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Uuid,
    pub metal: MetalKind,
    pub paid_amount: Decimal,
    pub quotation_id: Uuid,
    pub sell_price_used: Decimal,
    pub grams_credited: Decimal,
    pub payment_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Reconciliation of what a fully paid sale actually yielded.
///
/// Discrepancies are in grams; positive means the payments bought more
/// metal than the sale promised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleAdjustment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub receivable_id: Uuid,
    /// Sum of all currency payments
    pub payment_received: Decimal,
    /// Sum of the grams those payments bought
    pub payment_equivalent_grams: Decimal,
    /// Average price the payments implied, currency per gram
    pub implied_price: Option<Decimal>,
    /// Grams the sale promised
    pub expected_grams: Decimal,
    pub gross_discrepancy_grams: Decimal,
    /// Extra costs in currency, e.g. shipping
    pub costs: Decimal,
    pub costs_in_grams: Decimal,
    pub net_discrepancy_grams: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_status_after_payment() {
        assert_eq!(ReceivableStatus::after_payment(dec("20")), ReceivableStatus::PartiallyPaid);
        assert_eq!(ReceivableStatus::after_payment(Decimal::ZERO), ReceivableStatus::Paid);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ReceivableStatus::Pending,
            ReceivableStatus::PartiallyPaid,
            ReceivableStatus::Paid,
        ] {
            assert_eq!(ReceivableStatus::from_str(status.as_str()), Some(status));
        }
    }
}
