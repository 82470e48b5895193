//! Chemical analysis tests
//!
//! Tests for the analysis lifecycle including:
//! - Estimate chain: gross, recoverable, service fee and net always
//!   reconstruct each other exactly
//! - State machine legality, including cancellation rules
//! - Approval crediting the client's metal account

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use shared::models::{
    account_balance, analysis_next_state, compute_estimates, format_analysis_number, round_grams,
    AnalysisEvent, AnalysisState,
};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

const ALL_STATES: [AnalysisState; 9] = [
    AnalysisState::Received,
    AnalysisState::InAnalysis,
    AnalysisState::AwaitingClientApproval,
    AnalysisState::ApprovedForRecovery,
    AnalysisState::RefusedByClient,
    AnalysisState::InRecovery,
    AnalysisState::FinalizedRecovered,
    AnalysisState::Residue,
    AnalysisState::Cancelled,
];

const ALL_EVENTS: [AnalysisEvent; 10] = [
    AnalysisEvent::StartAnalysis,
    AnalysisEvent::EnterResult,
    AnalysisEvent::Approve,
    AnalysisEvent::Refuse,
    AnalysisEvent::RevertToPendingApproval,
    AnalysisEvent::LinkToRecoveryOrder,
    AnalysisEvent::UnlinkFromRecoveryOrder,
    AnalysisEvent::FinalizeRecovery,
    AnalysisEvent::Cancel,
    AnalysisEvent::WriteOffResidue,
];

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// 100 g at a 0.5 result with the default 5% break and 20% fee
    #[test]
    fn test_estimate_chain_with_defaults() {
        let est = compute_estimates(dec("100"), dec("0.5"), dec("0.05"), dec("0.20"));
        assert_eq!(est.gross_grams, dec("50.0000"));
        assert_eq!(est.gross_recoverable_grams, dec("47.5000"));
        assert_eq!(est.service_fee_grams, dec("9.5000"));
        assert_eq!(est.net_to_client_grams, dec("38.0000"));
    }

    #[test]
    fn test_zero_break_keeps_gross_recoverable() {
        let est = compute_estimates(dec("80"), dec("0.25"), Decimal::ZERO, dec("0.20"));
        assert_eq!(est.gross_grams, dec("20.0000"));
        assert_eq!(est.gross_recoverable_grams, dec("20.0000"));
    }

    #[test]
    fn test_full_fee_leaves_nothing_to_client() {
        let est = compute_estimates(dec("80"), dec("0.25"), dec("0.05"), Decimal::ONE);
        assert_eq!(est.net_to_client_grams, Decimal::ZERO);
        assert_eq!(est.service_fee_grams, est.gross_recoverable_grams);
    }

    /// Happy path from intake to finalization
    #[test]
    fn test_lifecycle_happy_path() {
        use AnalysisEvent::*;
        use AnalysisState::*;

        let steps = [
            (Received, StartAnalysis, InAnalysis),
            (InAnalysis, EnterResult, AwaitingClientApproval),
            (AwaitingClientApproval, Approve, ApprovedForRecovery),
            (ApprovedForRecovery, LinkToRecoveryOrder, InRecovery),
            (InRecovery, FinalizeRecovery, FinalizedRecovered),
        ];
        for (from, event, to) in steps {
            assert_eq!(analysis_next_state(from, event), Some(to));
        }
    }

    #[test]
    fn test_refusal_and_revert_paths() {
        use AnalysisEvent::*;
        use AnalysisState::*;

        assert_eq!(
            analysis_next_state(AwaitingClientApproval, Refuse),
            Some(RefusedByClient)
        );
        assert_eq!(
            analysis_next_state(ApprovedForRecovery, RevertToPendingApproval),
            Some(AwaitingClientApproval)
        );
        assert_eq!(
            analysis_next_state(InRecovery, UnlinkFromRecoveryOrder),
            Some(ApprovedForRecovery)
        );
    }

    /// Cancellation is legal from every pre-recovery state but never
    /// from in-recovery or the terminals
    #[test]
    fn test_cancellation_legality() {
        use AnalysisState::*;

        let cancellable = [
            Received,
            InAnalysis,
            AwaitingClientApproval,
            ApprovedForRecovery,
            RefusedByClient,
        ];
        for state in cancellable {
            assert_eq!(
                analysis_next_state(state, AnalysisEvent::Cancel),
                Some(Cancelled)
            );
        }
        for state in [InRecovery, FinalizedRecovered, Residue, Cancelled] {
            assert_eq!(analysis_next_state(state, AnalysisEvent::Cancel), None);
        }
    }

    #[test]
    fn test_residue_write_off_only_from_residue() {
        for state in ALL_STATES {
            let next = analysis_next_state(state, AnalysisEvent::WriteOffResidue);
            if state == AnalysisState::Residue {
                assert_eq!(next, Some(AnalysisState::Cancelled));
            } else {
                assert_eq!(next, None);
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        for state in ALL_STATES {
            let terminal = matches!(
                state,
                AnalysisState::FinalizedRecovered | AnalysisState::Cancelled
            );
            assert_eq!(state.is_terminal(), terminal);
        }
    }

    #[test]
    fn test_analysis_number_format() {
        assert_eq!(format_analysis_number(1), "AQ-0001");
        assert_eq!(format_analysis_number(482), "AQ-0482");
        assert_eq!(format_analysis_number(12345), "AQ-12345");
    }

    /// The JSON wire form of a state is the same string the database
    /// stores, so embedders and rows never disagree
    #[test]
    fn test_state_serialization_matches_stored_strings() {
        for state in ALL_STATES {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            let back: AnalysisState = serde_json::from_str(&json).unwrap();
            assert_eq!(back, state);
        }
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Strategy for generating positive input quantities
    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10_000_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    /// Strategy for generating positive result values
    fn result_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=1_000_000i64).prop_map(|n| Decimal::new(n, 6))
    }

    /// Strategy for generating fractions in [0, 1]
    fn fraction_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..=10_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Fee and net always reconstruct the recoverable amount exactly
        #[test]
        fn prop_fee_and_net_reconstruct_recoverable(
            quantity in quantity_strategy(),
            result in result_strategy(),
            break_pct in fraction_strategy(),
            fee_pct in fraction_strategy()
        ) {
            let est = compute_estimates(quantity, result, break_pct, fee_pct);
            prop_assert_eq!(
                est.service_fee_grams + est.net_to_client_grams,
                est.gross_recoverable_grams
            );
        }

        /// Every estimate figure carries the standard gram scale
        #[test]
        fn prop_estimates_at_gram_scale(
            quantity in quantity_strategy(),
            result in result_strategy(),
            break_pct in fraction_strategy(),
            fee_pct in fraction_strategy()
        ) {
            let est = compute_estimates(quantity, result, break_pct, fee_pct);
            prop_assert_eq!(est.gross_grams, round_grams(est.gross_grams));
            prop_assert_eq!(
                est.gross_recoverable_grams,
                round_grams(est.gross_recoverable_grams)
            );
            prop_assert_eq!(est.service_fee_grams, round_grams(est.service_fee_grams));
            prop_assert_eq!(est.net_to_client_grams, round_grams(est.net_to_client_grams));
        }

        /// The break never makes the recoverable amount exceed the gross
        #[test]
        fn prop_recoverable_bounded_by_gross(
            quantity in quantity_strategy(),
            result in result_strategy(),
            break_pct in fraction_strategy()
        ) {
            let est = compute_estimates(quantity, result, break_pct, dec("0.20"));
            prop_assert!(est.gross_recoverable_grams <= est.gross_grams);
        }

        /// The net to the client is never negative
        #[test]
        fn prop_net_nonnegative(
            quantity in quantity_strategy(),
            result in result_strategy(),
            break_pct in fraction_strategy(),
            fee_pct in fraction_strategy()
        ) {
            let est = compute_estimates(quantity, result, break_pct, fee_pct);
            prop_assert!(est.net_to_client_grams >= Decimal::ZERO);
        }

        /// Terminal states accept no event at all
        #[test]
        fn prop_terminal_states_accept_nothing(event_idx in 0usize..10) {
            let event = ALL_EVENTS[event_idx];
            for state in [AnalysisState::FinalizedRecovered, AnalysisState::Cancelled] {
                prop_assert_eq!(analysis_next_state(state, event), None);
            }
        }

        /// Each state admits at most three events
        #[test]
        fn prop_states_admit_few_events(state_idx in 0usize..9) {
            let state = ALL_STATES[state_idx];
            let admitted = ALL_EVENTS
                .iter()
                .filter(|event| analysis_next_state(state, **event).is_some())
                .count();
            prop_assert!(admitted <= 3);
        }
    }
}

// ============================================================================
// Integration Test Helpers (for use with actual database)
// ============================================================================

#[cfg(test)]
mod integration_helpers {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use shared::models::{EntryKind, MetalAccountEntry};
    use uuid::Uuid;

    /// Simulate an analysis walking through a sequence of events
    pub fn simulate_lifecycle(
        events: &[AnalysisEvent],
    ) -> Result<AnalysisState, &'static str> {
        events
            .iter()
            .try_fold(AnalysisState::Received, |state, event| {
                analysis_next_state(state, *event).ok_or("Illegal state transition")
            })
    }

    /// Simulate the ledger effect of approving an analysis: the net
    /// estimate is credited, nothing happens for a non-positive net
    pub fn simulate_approval_credit(
        entries: &mut Vec<MetalAccountEntry>,
        net_to_client: Decimal,
    ) {
        if net_to_client > Decimal::ZERO {
            entries.push(MetalAccountEntry {
                id: Uuid::new_v4(),
                account_id: Uuid::new_v4(),
                entry_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                grams: net_to_client,
                kind: EntryKind::RecoveryCredit,
                description: "Credit from analysis AQ-0001".to_string(),
                source_reference: None,
                created_at: Utc::now(),
            });
        }
    }

    #[test]
    fn test_lifecycle_to_finalized() {
        use AnalysisEvent::*;

        let state = simulate_lifecycle(&[
            StartAnalysis,
            EnterResult,
            Approve,
            LinkToRecoveryOrder,
            FinalizeRecovery,
        ])
        .unwrap();
        assert_eq!(state, AnalysisState::FinalizedRecovered);
    }

    #[test]
    fn test_lifecycle_rejects_skipped_steps() {
        use AnalysisEvent::*;

        assert!(simulate_lifecycle(&[Approve]).is_err());
        assert!(simulate_lifecycle(&[StartAnalysis, Approve]).is_err());
        assert!(simulate_lifecycle(&[StartAnalysis, EnterResult, LinkToRecoveryOrder]).is_err());
    }

    #[test]
    fn test_lifecycle_unlink_returns_to_approved() {
        use AnalysisEvent::*;

        let state = simulate_lifecycle(&[
            StartAnalysis,
            EnterResult,
            Approve,
            LinkToRecoveryOrder,
            UnlinkFromRecoveryOrder,
        ])
        .unwrap();
        assert_eq!(state, AnalysisState::ApprovedForRecovery);
    }

    #[test]
    fn test_approval_credits_net() {
        let mut entries = Vec::new();
        simulate_approval_credit(&mut entries, dec("50.0000"));
        assert_eq!(account_balance(&entries), dec("50.0000"));
    }

    #[test]
    fn test_approval_with_zero_net_writes_nothing() {
        let mut entries = Vec::new();
        simulate_approval_credit(&mut entries, Decimal::ZERO);
        assert!(entries.is_empty());
    }
}
