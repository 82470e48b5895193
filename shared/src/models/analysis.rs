//! Chemical analyses and their lifecycle state machine

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metal::MetalKind;
use super::quotation::round_grams;

/// Lifecycle state of a chemical analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Received,
    InAnalysis,
    AwaitingClientApproval,
    ApprovedForRecovery,
    RefusedByClient,
    InRecovery,
    FinalizedRecovered,
    /// Business-owned leftover spawned by a recovery finalization
    Residue,
    Cancelled,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Received => "received",
            AnalysisState::InAnalysis => "in_analysis",
            AnalysisState::AwaitingClientApproval => "awaiting_client_approval",
            AnalysisState::ApprovedForRecovery => "approved_for_recovery",
            AnalysisState::RefusedByClient => "refused_by_client",
            AnalysisState::InRecovery => "in_recovery",
            AnalysisState::FinalizedRecovered => "finalized_recovered",
            AnalysisState::Residue => "residue",
            AnalysisState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "received" => Some(AnalysisState::Received),
            "in_analysis" => Some(AnalysisState::InAnalysis),
            "awaiting_client_approval" => Some(AnalysisState::AwaitingClientApproval),
            "approved_for_recovery" => Some(AnalysisState::ApprovedForRecovery),
            "refused_by_client" => Some(AnalysisState::RefusedByClient),
            "in_recovery" => Some(AnalysisState::InRecovery),
            "finalized_recovered" => Some(AnalysisState::FinalizedRecovered),
            "residue" => Some(AnalysisState::Residue),
            "cancelled" => Some(AnalysisState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisState::FinalizedRecovered | AnalysisState::Cancelled)
    }
}

impl std::fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that drive an analysis through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisEvent {
    StartAnalysis,
    EnterResult,
    Approve,
    Refuse,
    RevertToPendingApproval,
    LinkToRecoveryOrder,
    UnlinkFromRecoveryOrder,
    FinalizeRecovery,
    Cancel,
    WriteOffResidue,
}

impl AnalysisEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisEvent::StartAnalysis => "start_analysis",
            AnalysisEvent::EnterResult => "enter_result",
            AnalysisEvent::Approve => "approve",
            AnalysisEvent::Refuse => "refuse",
            AnalysisEvent::RevertToPendingApproval => "revert_to_pending_approval",
            AnalysisEvent::LinkToRecoveryOrder => "link_to_recovery_order",
            AnalysisEvent::UnlinkFromRecoveryOrder => "unlink_from_recovery_order",
            AnalysisEvent::FinalizeRecovery => "finalize_recovery",
            AnalysisEvent::Cancel => "cancel",
            AnalysisEvent::WriteOffResidue => "write_off_residue",
        }
    }
}

/// Full transition table for the analysis state machine.
///
/// Returns `None` when the event is not legal in the given state.
/// Cancellation is deliberately not accepted from `InRecovery`; the
/// owning recovery order must be cancelled instead, which unlinks the
/// analysis back to `ApprovedForRecovery`.
pub fn analysis_next_state(state: AnalysisState, event: AnalysisEvent) -> Option<AnalysisState> {
    use AnalysisEvent::*;
    use AnalysisState::*;

    match (state, event) {
        (Received, StartAnalysis) => Some(InAnalysis),
        (InAnalysis, EnterResult) => Some(AwaitingClientApproval),
        (AwaitingClientApproval, Approve) => Some(ApprovedForRecovery),
        (AwaitingClientApproval, Refuse) => Some(RefusedByClient),
        (ApprovedForRecovery, RevertToPendingApproval) => Some(AwaitingClientApproval),
        (ApprovedForRecovery, LinkToRecoveryOrder) => Some(InRecovery),
        (InRecovery, UnlinkFromRecoveryOrder) => Some(ApprovedForRecovery),
        (InRecovery, FinalizeRecovery) => Some(FinalizedRecovered),
        (Residue, WriteOffResidue) => Some(Cancelled),
        (
            Received | InAnalysis | AwaitingClientApproval | ApprovedForRecovery | RefusedByClient,
            Cancel,
        ) => Some(Cancelled),
        _ => None,
    }
}

/// Estimate chain computed when an analysis result is entered.
///
/// All figures are grams at the standard scale. The service fee and
/// net amount always reconstruct the recoverable amount exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisEstimates {
    /// Input quantity times the measured result
    pub gross_grams: Decimal,
    /// Gross after the expected processing break
    pub gross_recoverable_grams: Decimal,
    /// Refinery fee taken from the recoverable amount
    pub service_fee_grams: Decimal,
    /// What the client is owed if they approve
    pub net_to_client_grams: Decimal,
}

/// Compute the estimate chain from a measured result.
///
/// `break_percent` and `service_fee_percent` are fractions in [0, 1].
pub fn compute_estimates(
    input_quantity: Decimal,
    result_value: Decimal,
    break_percent: Decimal,
    service_fee_percent: Decimal,
) -> AnalysisEstimates {
    let gross_grams = round_grams(input_quantity * result_value);
    let gross_recoverable_grams = round_grams(gross_grams * (Decimal::ONE - break_percent));
    let service_fee_grams = round_grams(gross_recoverable_grams * service_fee_percent);
    let net_to_client_grams = gross_recoverable_grams - service_fee_grams;

    AnalysisEstimates {
        gross_grams,
        gross_recoverable_grams,
        service_fee_grams,
        net_to_client_grams,
    }
}

/// A client's material under analysis, or a business-owned residue.
///
/// `client_id` is `None` only for residue analyses spawned by a
/// recovery finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChemicalAnalysis {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub client_id: Option<Uuid>,
    /// Sequential document number, e.g. "AQ-0042"
    pub analysis_number: String,
    pub metal: MetalKind,
    pub description: String,
    pub input_quantity: Decimal,
    pub input_unit: String,
    pub state: AnalysisState,
    /// Measured metal content per input unit
    pub result_value: Option<Decimal>,
    pub result_unit: Option<String>,
    pub break_percent: Option<Decimal>,
    pub service_fee_percent: Option<Decimal>,
    pub gross_grams: Option<Decimal>,
    pub gross_recoverable_grams: Option<Decimal>,
    pub service_fee_grams: Option<Decimal>,
    pub net_to_client_grams: Option<Decimal>,
    pub entry_date: NaiveDate,
    pub started_at: Option<DateTime<Utc>>,
    pub result_entered_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub refused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    /// Set once a residue analysis has been valued and written off
    pub written_off: bool,
    pub recovery_order_id: Option<Uuid>,
    /// For residue analyses, the order whose leftover this is
    pub residue_of_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Format an analysis document number from its sequence
pub fn format_analysis_number(sequence: i64) -> String {
    format!("AQ-{:04}", sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_estimates_with_default_fractions() {
        // 100 g at 0.5 g/g, 5% break, 20% fee
        let est = compute_estimates(dec("100"), dec("0.5"), dec("0.05"), dec("0.20"));
        assert_eq!(est.gross_grams, dec("50.0000"));
        assert_eq!(est.gross_recoverable_grams, dec("47.5000"));
        assert_eq!(est.service_fee_grams, dec("9.5000"));
        assert_eq!(est.net_to_client_grams, dec("38.0000"));
    }

    #[test]
    fn test_fee_and_net_reconstruct_recoverable() {
        let est = compute_estimates(dec("123.4567"), dec("0.3333"), dec("0.05"), dec("0.20"));
        assert_eq!(
            est.service_fee_grams + est.net_to_client_grams,
            est.gross_recoverable_grams
        );
    }

    #[test]
    fn test_cancel_not_legal_in_recovery() {
        assert_eq!(
            analysis_next_state(AnalysisState::InRecovery, AnalysisEvent::Cancel),
            None
        );
    }

    #[test]
    fn test_analysis_number_format() {
        assert_eq!(format_analysis_number(7), "AQ-0007");
        assert_eq!(format_analysis_number(12345), "AQ-12345");
    }
}
