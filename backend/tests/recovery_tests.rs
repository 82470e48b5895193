//! Recovery order tests
//!
//! Tests for batching approved analyses through processing including:
//! - Yield split: recovered pure metal plus residue always sum back to
//!   the weighed processing result
//! - Order state machine legality, with result correction before the
//!   purity assay
//! - Order totals and commission conversion to gold equivalent

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use shared::models::{
    compute_estimates, recovery_next_state, recovery_yield, round_grams, RecoveryOrderEvent,
    RecoveryOrderState,
};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

const ALL_ORDER_STATES: [RecoveryOrderState; 5] = [
    RecoveryOrderState::Pending,
    RecoveryOrderState::InProgress,
    RecoveryOrderState::AwaitingPurity,
    RecoveryOrderState::Finalized,
    RecoveryOrderState::Cancelled,
];

const ALL_ORDER_EVENTS: [RecoveryOrderEvent; 4] = [
    RecoveryOrderEvent::Start,
    RecoveryOrderEvent::RecordProcessingResult,
    RecoveryOrderEvent::FinalizeWithPurity,
    RecoveryOrderEvent::Cancel,
];

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use shared::models::{MetalKind, PriceSide, Quotation};
    use uuid::Uuid;

    #[test]
    fn test_yield_with_assayed_purity() {
        let (recovered, residue) = recovery_yield(dec("75.5"), dec("0.925"));
        assert_eq!(recovered, dec("69.8375"));
        assert_eq!(residue, dec("5.6625"));
        assert_eq!(recovered + residue, dec("75.5000"));
    }

    #[test]
    fn test_yield_rounds_recovered_to_gram_scale() {
        // 10 * 0.3333 = 3.333, residue carries the remainder
        let (recovered, residue) = recovery_yield(dec("10"), dec("0.3333"));
        assert_eq!(recovered, dec("3.3330"));
        assert_eq!(residue, dec("6.6670"));
    }

    #[test]
    fn test_order_lifecycle_happy_path() {
        use RecoveryOrderEvent::*;
        use RecoveryOrderState::*;

        let steps = [
            (Pending, Start, InProgress),
            (InProgress, RecordProcessingResult, AwaitingPurity),
            (AwaitingPurity, RecordProcessingResult, AwaitingPurity),
            (AwaitingPurity, FinalizeWithPurity, Finalized),
        ];
        for (from, event, to) in steps {
            assert_eq!(recovery_next_state(from, event), Some(to));
        }
    }

    #[test]
    fn test_cancellation_legality() {
        use RecoveryOrderState::*;

        for state in [Pending, InProgress, AwaitingPurity] {
            assert_eq!(
                recovery_next_state(state, RecoveryOrderEvent::Cancel),
                Some(Cancelled)
            );
        }
        for state in [Finalized, Cancelled] {
            assert_eq!(recovery_next_state(state, RecoveryOrderEvent::Cancel), None);
        }
    }

    #[test]
    fn test_no_shortcuts_through_the_pipeline() {
        use RecoveryOrderEvent::*;
        use RecoveryOrderState::*;

        assert_eq!(recovery_next_state(Pending, RecordProcessingResult), None);
        assert_eq!(recovery_next_state(Pending, FinalizeWithPurity), None);
        assert_eq!(recovery_next_state(InProgress, FinalizeWithPurity), None);
    }

    /// The order total is the sum of the linked analyses' recoverable
    /// estimates
    #[test]
    fn test_total_estimate_sums_linked_analyses() {
        let estimates = [
            compute_estimates(dec("100"), dec("0.5"), dec("0.05"), dec("0.20")),
            compute_estimates(dec("200"), dec("0.25"), dec("0.05"), dec("0.20")),
            compute_estimates(dec("80"), dec("0.1"), Decimal::ZERO, dec("0.20")),
        ];
        let total: Decimal = estimates.iter().map(|e| e.gross_recoverable_grams).sum();
        assert_eq!(total, dec("103.0000"));
    }

    /// Commission in currency is restated in grams at the day's sell
    /// price
    #[test]
    fn test_commission_gold_equivalent() {
        let quotation = Quotation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            metal: MetalKind::Au,
            quote_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            buy_price: dec("480.00"),
            sell_price: dec("500.00"),
            created_at: Utc::now(),
        };
        assert_eq!(
            quotation.grams_for_currency(dec("1000"), PriceSide::Sell),
            dec("2.0000")
        );
    }

    #[test]
    fn test_order_state_round_trip() {
        for state in ALL_ORDER_STATES {
            assert_eq!(RecoveryOrderState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(RecoveryOrderState::from_str("melted"), None);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Strategy for generating purities in (0, 1]
    fn purity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    /// Strategy for generating weighed processing results
    fn result_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100_000_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Recovered metal and residue always reconstruct the weighed
        /// result exactly
        #[test]
        fn prop_yield_parts_sum_to_result(
            result in result_strategy(),
            purity in purity_strategy()
        ) {
            let (recovered, residue) = recovery_yield(result, purity);
            prop_assert_eq!(recovered + residue, result);
        }

        /// The recovered portion never exceeds the weighed result
        #[test]
        fn prop_recovered_at_most_result(
            result in result_strategy(),
            purity in purity_strategy()
        ) {
            let (recovered, _) = recovery_yield(result, purity);
            prop_assert!(recovered <= result);
        }

        /// Residue is never negative
        #[test]
        fn prop_residue_nonnegative(
            result in result_strategy(),
            purity in purity_strategy()
        ) {
            let (_, residue) = recovery_yield(result, purity);
            prop_assert!(residue >= Decimal::ZERO);
        }

        /// Full purity leaves no residue at all
        #[test]
        fn prop_full_purity_no_residue(result in result_strategy()) {
            let (recovered, residue) = recovery_yield(result, Decimal::ONE);
            prop_assert_eq!(recovered, result);
            prop_assert!(residue.is_zero());
        }

        /// The recovered portion carries the standard gram scale
        #[test]
        fn prop_recovered_at_gram_scale(
            result in result_strategy(),
            purity in purity_strategy()
        ) {
            let (recovered, _) = recovery_yield(result, purity);
            prop_assert_eq!(recovered, round_grams(recovered));
        }

        /// Terminal orders accept no event at all
        #[test]
        fn prop_terminal_orders_accept_nothing(event_idx in 0usize..4) {
            let event = ALL_ORDER_EVENTS[event_idx];
            for state in [RecoveryOrderState::Finalized, RecoveryOrderState::Cancelled] {
                prop_assert_eq!(recovery_next_state(state, event), None);
            }
        }
    }
}

// ============================================================================
// Integration Test Helpers (for use with actual database)
// ============================================================================

#[cfg(test)]
mod integration_helpers {
    use super::*;
    use shared::validation::validate_purity;

    /// Simulate an order walking through a sequence of events
    pub fn simulate_order_lifecycle(
        events: &[RecoveryOrderEvent],
    ) -> Result<RecoveryOrderState, &'static str> {
        events
            .iter()
            .try_fold(RecoveryOrderState::Pending, |state, event| {
                recovery_next_state(state, *event).ok_or("Illegal state transition")
            })
    }

    /// Simulate finalization: validate the assayed purity, then split
    /// the weighed result into recovered metal and residue
    pub fn simulate_finalization(
        result_grams: Decimal,
        purity: Decimal,
    ) -> Result<(Decimal, Decimal), &'static str> {
        validate_purity(purity)?;
        Ok(recovery_yield(result_grams, purity))
    }

    #[test]
    fn test_finalization_splits_output() {
        let (recovered, residue) = simulate_finalization(dec("90"), dec("0.98")).unwrap();
        assert_eq!(recovered, dec("88.2000"));
        assert_eq!(residue, dec("1.8000"));
    }

    #[test]
    fn test_finalization_rejects_bad_purity() {
        assert!(simulate_finalization(dec("90"), Decimal::ZERO).is_err());
        assert!(simulate_finalization(dec("90"), dec("-0.5")).is_err());
        assert!(simulate_finalization(dec("90"), dec("1.2")).is_err());
    }

    #[test]
    fn test_lifecycle_with_correction() {
        use RecoveryOrderEvent::*;

        let state = simulate_order_lifecycle(&[
            Start,
            RecordProcessingResult,
            RecordProcessingResult,
            FinalizeWithPurity,
        ])
        .unwrap();
        assert_eq!(state, RecoveryOrderState::Finalized);
    }

    #[test]
    fn test_lifecycle_rejects_finalize_before_result() {
        use RecoveryOrderEvent::*;

        assert!(simulate_order_lifecycle(&[Start, FinalizeWithPurity]).is_err());
        assert!(simulate_order_lifecycle(&[FinalizeWithPurity]).is_err());
    }

    #[test]
    fn test_cancelled_order_accepts_nothing() {
        use RecoveryOrderEvent::*;

        assert!(simulate_order_lifecycle(&[Cancel, Start]).is_err());
        assert!(simulate_order_lifecycle(&[Start, Cancel, RecordProcessingResult]).is_err());
    }
}
