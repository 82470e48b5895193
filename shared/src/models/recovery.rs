//! Recovery orders: batching approved analyses through processing

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metal::MetalKind;
use super::quotation::round_grams;

/// Lifecycle state of a recovery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOrderState {
    Pending,
    InProgress,
    AwaitingPurity,
    Finalized,
    Cancelled,
}

impl RecoveryOrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOrderState::Pending => "pending",
            RecoveryOrderState::InProgress => "in_progress",
            RecoveryOrderState::AwaitingPurity => "awaiting_purity",
            RecoveryOrderState::Finalized => "finalized",
            RecoveryOrderState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecoveryOrderState::Pending),
            "in_progress" => Some(RecoveryOrderState::InProgress),
            "awaiting_purity" => Some(RecoveryOrderState::AwaitingPurity),
            "finalized" => Some(RecoveryOrderState::Finalized),
            "cancelled" => Some(RecoveryOrderState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryOrderState::Finalized | RecoveryOrderState::Cancelled)
    }
}

impl std::fmt::Display for RecoveryOrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that drive a recovery order through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOrderEvent {
    Start,
    RecordProcessingResult,
    FinalizeWithPurity,
    Cancel,
}

impl RecoveryOrderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOrderEvent::Start => "start",
            RecoveryOrderEvent::RecordProcessingResult => "record_processing_result",
            RecoveryOrderEvent::FinalizeWithPurity => "finalize_with_purity",
            RecoveryOrderEvent::Cancel => "cancel",
        }
    }
}

/// Transition table for the recovery order state machine.
///
/// Recording a processing result is repeatable from `AwaitingPurity`
/// so a weighing mistake can be corrected before finalization.
pub fn recovery_next_state(
    state: RecoveryOrderState,
    event: RecoveryOrderEvent,
) -> Option<RecoveryOrderState> {
    use RecoveryOrderEvent::*;
    use RecoveryOrderState::*;

    match (state, event) {
        (Pending, Start) => Some(InProgress),
        (InProgress, RecordProcessingResult) => Some(AwaitingPurity),
        (AwaitingPurity, RecordProcessingResult) => Some(AwaitingPurity),
        (AwaitingPurity, FinalizeWithPurity) => Some(Finalized),
        (Pending | InProgress | AwaitingPurity, Cancel) => Some(Cancelled),
        _ => None,
    }
}

/// Split a weighed processing result into pure metal and residue.
///
/// `purity` is a fraction in (0, 1]. The two parts always sum back to
/// the weighed result.
pub fn recovery_yield(result_grams: Decimal, purity: Decimal) -> (Decimal, Decimal) {
    let recovered = round_grams(result_grams * purity);
    let residue = result_grams - recovered;
    (recovered, residue)
}

/// A batch of approved analyses moving through physical recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOrder {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Sequential document number, e.g. "OR-0042"
    pub order_number: String,
    pub metal: MetalKind,
    pub state: RecoveryOrderState,
    /// Sum of the linked analyses' recoverable estimates
    pub total_estimated_grams: Decimal,
    /// Weighed output of processing, before the purity assay
    pub processing_result_grams: Option<Decimal>,
    /// Assayed purity fraction in (0, 1]
    pub purity: Option<Decimal>,
    pub recovered_pure_grams: Option<Decimal>,
    pub residue_grams: Option<Decimal>,
    /// Business-owned analysis spawned for the residue, if any
    pub residue_analysis_id: Option<Uuid>,
    pub salesperson_id: Option<Uuid>,
    pub commission_amount: Option<Decimal>,
    pub commission_percent: Option<Decimal>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw material drawn from an inventory lot into an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMaterialConsumption {
    pub id: Uuid,
    pub order_id: Uuid,
    pub lot_id: Uuid,
    pub grams: Decimal,
    /// Currency cost at the lot's unit cost
    pub cost: Decimal,
    /// Cost restated in grams of metal at the day's buy price
    pub gold_equivalent_cost: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// Commission owed to a salesperson for a finalized order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionPayable {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub order_id: Uuid,
    pub salesperson_id: Uuid,
    /// Commission in currency
    pub amount: Decimal,
    pub percent: Option<Decimal>,
    pub metal: MetalKind,
    /// Commission restated in grams at the day's sell price
    pub gold_equivalent_grams: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Format a recovery order document number from its sequence
pub fn format_order_number(sequence: i64) -> String {
    format!("OR-{:04}", sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_yield_splits_result_exactly() {
        let (recovered, residue) = recovery_yield(dec("90"), dec("0.98"));
        assert_eq!(recovered, dec("88.2000"));
        assert_eq!(residue, dec("1.8000"));
        assert_eq!(recovered + residue, dec("90.0000"));
    }

    #[test]
    fn test_full_purity_leaves_no_residue() {
        let (recovered, residue) = recovery_yield(dec("42.5"), Decimal::ONE);
        assert_eq!(recovered, dec("42.5000"));
        assert_eq!(residue, dec("0.0000"));
    }

    #[test]
    fn test_result_can_be_corrected_before_finalization() {
        assert_eq!(
            recovery_next_state(
                RecoveryOrderState::AwaitingPurity,
                RecoveryOrderEvent::RecordProcessingResult
            ),
            Some(RecoveryOrderState::AwaitingPurity)
        );
    }

    #[test]
    fn test_finalized_order_cannot_be_cancelled() {
        assert_eq!(
            recovery_next_state(RecoveryOrderState::Finalized, RecoveryOrderEvent::Cancel),
            None
        );
    }

    #[test]
    fn test_order_number_format() {
        assert_eq!(format_order_number(3), "OR-0003");
    }
}
