//! Physical stock: products, FIFO lots and the movement log

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metal::MetalKind;

/// Where a lot's material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotSourceType {
    Purchase,
    Adjustment,
    Recovery,
    Migration,
    SalePayment,
}

impl LotSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotSourceType::Purchase => "purchase",
            LotSourceType::Adjustment => "adjustment",
            LotSourceType::Recovery => "recovery",
            LotSourceType::Migration => "migration",
            LotSourceType::SalePayment => "sale_payment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(LotSourceType::Purchase),
            "adjustment" => Some(LotSourceType::Adjustment),
            "recovery" => Some(LotSourceType::Recovery),
            "migration" => Some(LotSourceType::Migration),
            "sale_payment" => Some(LotSourceType::SalePayment),
            _ => None,
        }
    }
}

/// Why stock moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// New material received into a lot
    Receipt,
    /// Stock separated for a sale
    Sale,
    /// Raw material consumed by a recovery order
    RecoveryConsumption,
    /// Consumed material returned when an order is cancelled
    Release,
    /// Reconciliation or manual correction
    Adjustment,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Receipt => "receipt",
            MovementKind::Sale => "sale",
            MovementKind::RecoveryConsumption => "recovery_consumption",
            MovementKind::Release => "release",
            MovementKind::Adjustment => "adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "receipt" => Some(MovementKind::Receipt),
            "sale" => Some(MovementKind::Sale),
            "recovery_consumption" => Some(MovementKind::RecoveryConsumption),
            "release" => Some(MovementKind::Release),
            "adjustment" => Some(MovementKind::Adjustment),
            _ => None,
        }
    }
}

/// A stockable item, such as fine gold or a salt of a given metal.
///
/// `current_stock` is a cached sum of lot remainders, kept in step
/// transactionally and repairable through reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub metal: MetalKind,
    /// Unit of measure, grams unless stated otherwise
    pub unit: String,
    pub current_stock: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A batch of product received at one time and cost.
///
/// `remaining_quantity` never goes below zero and never exceeds
/// `original_quantity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryLot {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub product_id: Uuid,
    pub batch_number: String,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    /// Acquisition cost per unit, zero when unknown
    pub cost_per_unit: Decimal,
    pub source_type: LotSourceType,
    /// Document the lot came from, such as an order number
    pub source_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// One signed movement in the stock log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub product_id: Uuid,
    pub lot_id: Option<Uuid>,
    /// Positive for stock in, negative for stock out
    pub quantity: Decimal,
    pub kind: MovementKind,
    /// Human-readable document reference, e.g. "Sale #123"
    pub source_document: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Extract a trailing document number from a reference like "Sale #123".
///
/// Statements use this to break ties between movements created at the
/// same instant.
pub fn document_number(source_document: &str) -> Option<i64> {
    let idx = source_document.rfind('#')?;
    let digits: String = source_document[idx + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}
