//! Settlement tests
//!
//! Tests for deposits, receivables and sale adjustments including:
//! - Currency deposits converting to grams at the day's sell price
//! - Payments reducing a receivable, clamped to the remainder, with
//!   the excess credited to the client's account
//! - Sale adjustment reconciliation once a receivable is fully paid

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;

use shared::models::{round_currency, round_grams, ReceivableStatus};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use shared::models::{MetalKind, PriceSide, Quotation};
    use uuid::Uuid;

    fn quotation(sell: &str) -> Quotation {
        Quotation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            metal: MetalKind::Au,
            quote_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            buy_price: dec("480.00"),
            sell_price: dec(sell),
            created_at: Utc::now(),
        }
    }

    /// R$ 10,000 at a R$ 500/g sell price credits 20 g
    #[test]
    fn test_deposit_buys_grams_at_sell_price() {
        let q = quotation("500.00");
        assert_eq!(q.grams_for_currency(dec("10000"), PriceSide::Sell), dec("20.0000"));
    }

    /// A few cents cannot buy any metal at all
    #[test]
    fn test_tiny_deposit_buys_nothing() {
        let q = quotation("500.00");
        assert_eq!(q.grams_for_currency(dec("0.01"), PriceSide::Sell), Decimal::ZERO);
    }

    #[test]
    fn test_payment_applies_up_to_remaining() {
        let q = quotation("1000.00");
        let remaining = dec("40.0000");
        let paid_grams = q.grams_for_currency(dec("20000"), PriceSide::Sell);
        assert_eq!(paid_grams, dec("20.0000"));

        let applied = paid_grams.min(remaining);
        assert_eq!(applied, dec("20.0000"));
        assert_eq!(
            ReceivableStatus::after_payment(remaining - applied),
            ReceivableStatus::PartiallyPaid
        );
    }

    #[test]
    fn test_overpayment_clamps_to_remaining() {
        let q = quotation("500.00");
        let remaining = dec("5.0000");
        let paid_grams = q.grams_for_currency(dec("4000"), PriceSide::Sell);
        assert_eq!(paid_grams, dec("8.0000"));

        let applied = paid_grams.min(remaining);
        let overpayment = paid_grams - applied;
        assert_eq!(applied, dec("5.0000"));
        assert_eq!(overpayment, dec("3.0000"));
        assert_eq!(
            ReceivableStatus::after_payment(remaining - applied),
            ReceivableStatus::Paid
        );
    }

    #[test]
    fn test_even_a_trace_remainder_stays_partially_paid() {
        assert_eq!(
            ReceivableStatus::after_payment(dec("0.0001")),
            ReceivableStatus::PartiallyPaid
        );
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;
    use super::integration_helpers::simulate_payment;

    /// Strategy for generating outstanding gram remainders
    fn remaining_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=1_000_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    /// Strategy for generating currency payment amounts
    fn amount_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100_000_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    /// Strategy for generating sell prices
    fn price_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A payment never reduces a receivable past zero
        #[test]
        fn prop_applied_never_exceeds_remaining(
            remaining in remaining_strategy(),
            amount in amount_strategy(),
            price in price_strategy()
        ) {
            let (applied, _, _) = simulate_payment(remaining, amount, price).unwrap();
            prop_assert!(applied <= remaining);
            prop_assert!(remaining - applied >= Decimal::ZERO);
        }

        /// The grams a payment bought split exactly into the applied
        /// portion and the overpayment
        #[test]
        fn prop_applied_plus_overpayment_is_what_the_payment_bought(
            remaining in remaining_strategy(),
            amount in amount_strategy(),
            price in price_strategy()
        ) {
            let (applied, overpayment, _) = simulate_payment(remaining, amount, price).unwrap();
            prop_assert_eq!(applied + overpayment, round_grams(amount / price));
            prop_assert!(overpayment >= Decimal::ZERO);
        }

        /// A receivable is paid exactly when nothing remains
        #[test]
        fn prop_paid_iff_nothing_remains(
            remaining in remaining_strategy(),
            amount in amount_strategy(),
            price in price_strategy()
        ) {
            let (applied, _, status) = simulate_payment(remaining, amount, price).unwrap();
            let after = remaining - applied;
            prop_assert_eq!(status == ReceivableStatus::Paid, after.is_zero());
        }

        /// With no extra costs the net discrepancy equals the gross one
        #[test]
        fn prop_zero_costs_keep_gross_discrepancy(
            expected in remaining_strategy(),
            amount in amount_strategy(),
            grams in remaining_strategy()
        ) {
            let (gross, net, _) = super::integration_helpers::simulate_adjustment(
                &[(amount, grams)],
                expected,
                Decimal::ZERO,
            );
            prop_assert_eq!(gross, net);
        }
    }
}

// ============================================================================
// Integration Test Helpers (for use with actual database)
// ============================================================================

#[cfg(test)]
mod integration_helpers {
    use super::*;

    /// Simulate applying a currency payment against a receivable.
    ///
    /// Returns the grams applied, the overpayment left for the client's
    /// account and the resulting status.
    pub fn simulate_payment(
        remaining: Decimal,
        amount: Decimal,
        sell_price: Decimal,
    ) -> Result<(Decimal, Decimal, ReceivableStatus), &'static str> {
        if amount <= Decimal::ZERO {
            return Err("Payment amount must be positive");
        }
        if sell_price <= Decimal::ZERO {
            return Err("No quotation for the payment date");
        }
        let paid_grams = round_grams(amount / sell_price);
        let applied = paid_grams.min(remaining);
        let overpayment = paid_grams - applied;
        let status = ReceivableStatus::after_payment(remaining - applied);
        Ok((applied, overpayment, status))
    }

    /// Simulate the sale adjustment for a fully paid receivable.
    ///
    /// `payments` are `(paid_amount, grams_credited)` pairs. Returns
    /// the gross discrepancy, the net discrepancy after costs, and the
    /// implied average price.
    pub fn simulate_adjustment(
        payments: &[(Decimal, Decimal)],
        expected_grams: Decimal,
        costs: Decimal,
    ) -> (Decimal, Decimal, Option<Decimal>) {
        let received: Decimal = payments.iter().map(|(amount, _)| *amount).sum();
        let equivalent: Decimal = payments.iter().map(|(_, grams)| *grams).sum();
        let implied = if equivalent > Decimal::ZERO {
            Some(round_currency(received / equivalent))
        } else {
            None
        };
        let gross = equivalent - expected_grams;
        let costs_in_grams = match implied {
            Some(price) if price > Decimal::ZERO => round_grams(costs / price),
            _ => Decimal::ZERO,
        };
        let net = gross - costs_in_grams;
        (gross, net, implied)
    }

    /// Two payments at different prices against a 40 g sale with
    /// R$ 1,000 of shipping costs
    #[test]
    fn test_adjustment_worked_example() {
        let payments = [
            (dec("20000.00"), dec("20.0000")),
            (dec("10000.00"), dec("25.0000")),
        ];
        let (gross, net, implied) = simulate_adjustment(&payments, dec("40.0000"), dec("1000.00"));

        // 45 g bought against 40 g promised
        assert_eq!(gross, dec("5.0000"));
        // 30,000 / 45 g averages to 666.67 per gram
        assert_eq!(implied, Some(dec("666.67")));
        // 1,000 of costs is 1.5 g at that price
        assert_eq!(net, dec("3.5000"));
    }

    #[test]
    fn test_exact_settlement_has_no_discrepancy() {
        let (gross, net, implied) =
            simulate_adjustment(&[(dec("20000.00"), dec("40.0000"))], dec("40.0000"), Decimal::ZERO);
        assert_eq!(gross, dec("0.0000"));
        assert_eq!(net, dec("0.0000"));
        assert_eq!(implied, Some(dec("500.00")));
    }

    #[test]
    fn test_partial_then_final_payment() {
        let (applied, overpayment, status) =
            simulate_payment(dec("40.0000"), dec("20000.00"), dec("1000.00")).unwrap();
        assert_eq!(applied, dec("20.0000"));
        assert_eq!(overpayment, Decimal::ZERO);
        assert_eq!(status, ReceivableStatus::PartiallyPaid);

        let remaining = dec("40.0000") - applied;
        let (applied, overpayment, status) =
            simulate_payment(remaining, dec("20000.00"), dec("1000.00")).unwrap();
        assert_eq!(applied, dec("20.0000"));
        assert_eq!(overpayment, Decimal::ZERO);
        assert_eq!(status, ReceivableStatus::Paid);
    }

    #[test]
    fn test_overpayment_is_returned_for_crediting() {
        let (applied, overpayment, status) =
            simulate_payment(dec("5.0000"), dec("4000.00"), dec("500.00")).unwrap();
        assert_eq!(applied, dec("5.0000"));
        assert_eq!(overpayment, dec("3.0000"));
        assert_eq!(status, ReceivableStatus::Paid);
    }

    #[test]
    fn test_rejects_bad_payment_inputs() {
        assert!(simulate_payment(dec("40"), Decimal::ZERO, dec("500")).is_err());
        assert!(simulate_payment(dec("40"), dec("-100"), dec("500")).is_err());
        assert!(simulate_payment(dec("40"), dec("100"), Decimal::ZERO).is_err());
    }
}
