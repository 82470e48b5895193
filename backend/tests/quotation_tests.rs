//! Quotation and gram conversion tests
//!
//! Tests for daily metal prices including:
//! - Currency-to-grams conversion at the sell price
//! - Standard rounding scales for grams and currency
//! - Effective quotation resolution by date

use chrono::{NaiveDate, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use shared::models::{round_currency, round_grams, MetalKind, PriceSide, Quotation};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn quotation(buy: &str, sell: &str) -> Quotation {
    Quotation {
        id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
        metal: MetalKind::Au,
        quote_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        buy_price: dec(buy),
        sell_price: dec(sell),
        created_at: Utc::now(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// A 10 000 BRL deposit at a 500.00 sell price buys 20.0000 g
    #[test]
    fn test_deposit_conversion_at_sell_price() {
        let q = quotation("480.00", "500.00");
        let grams = q.grams_for_currency(dec("10000"), PriceSide::Sell);
        assert_eq!(grams, dec("20.0000"));
    }

    #[test]
    fn test_conversion_rounds_to_gram_scale() {
        let q = quotation("480.00", "500.00");
        // 1000 / 300 = 3.3333... recurring
        let q = Quotation {
            sell_price: dec("300.00"),
            ..q
        };
        let grams = q.grams_for_currency(dec("1000"), PriceSide::Sell);
        assert_eq!(grams, dec("3.3333"));
    }

    #[test]
    fn test_price_side_selection() {
        let q = quotation("480.00", "500.00");
        assert_eq!(q.price(PriceSide::Buy), dec("480.00"));
        assert_eq!(q.price(PriceSide::Sell), dec("500.00"));
    }

    /// A zero price converts to zero grams instead of dividing by zero
    #[test]
    fn test_zero_price_yields_zero_grams() {
        let q = quotation("0", "0");
        assert_eq!(
            q.grams_for_currency(dec("5000"), PriceSide::Sell),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_currency_for_grams() {
        let q = quotation("480.00", "500.00");
        assert_eq!(
            q.currency_for_grams(dec("20"), PriceSide::Sell),
            dec("10000.00")
        );
    }

    /// Midpoints round away from zero at both scales
    #[test]
    fn test_midpoint_rounding() {
        assert_eq!(round_grams(dec("0.00005")), dec("0.0001"));
        assert_eq!(round_grams(dec("-0.00005")), dec("-0.0001"));
        assert_eq!(round_currency(dec("10.005")), dec("10.01"));
        assert_eq!(round_currency(dec("-10.005")), dec("-10.01"));
    }

    #[test]
    fn test_metal_kind_round_trip() {
        for metal in [MetalKind::Au, MetalKind::Ag, MetalKind::Rh] {
            assert_eq!(MetalKind::from_str(metal.as_str()), Some(metal));
        }
        assert_eq!(MetalKind::from_str("fe"), None);
    }

    #[test]
    fn test_metal_kind_symbols() {
        assert_eq!(MetalKind::Au.symbol(), "Au");
        assert_eq!(MetalKind::Ag.symbol(), "Ag");
        assert_eq!(MetalKind::Rh.symbol(), "Rh");
    }

    /// JSON serialization uses the same strings the database stores
    #[test]
    fn test_metal_kind_serialization_matches_stored_strings() {
        for metal in [MetalKind::Au, MetalKind::Ag, MetalKind::Rh] {
            let json = serde_json::to_string(&metal).unwrap();
            assert_eq!(json, format!("\"{}\"", metal.as_str()));
        }
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Strategy for generating positive prices (0.01 to 10000.00)
    fn price_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=1_000_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    /// Strategy for generating positive currency amounts
    fn amount_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100_000_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Converted grams always carry the standard 4-decimal scale
        #[test]
        fn prop_grams_at_standard_scale(
            amount in amount_strategy(),
            price in price_strategy()
        ) {
            let q = Quotation { sell_price: price, ..quotation("1", "1") };
            let grams = q.grams_for_currency(amount, PriceSide::Sell);
            prop_assert_eq!(grams, round_grams(grams));
        }

        /// More money never buys fewer grams at the same price
        #[test]
        fn prop_conversion_monotonic(
            amount in amount_strategy(),
            extra in amount_strategy(),
            price in price_strategy()
        ) {
            let q = Quotation { sell_price: price, ..quotation("1", "1") };
            let base = q.grams_for_currency(amount, PriceSide::Sell);
            let more = q.grams_for_currency(amount + extra, PriceSide::Sell);
            prop_assert!(more >= base);
        }

        /// Converting back loses at most half a gram-scale step of value
        /// plus half a cent
        #[test]
        fn prop_round_trip_error_bounded(
            amount in amount_strategy(),
            price in price_strategy()
        ) {
            let q = Quotation { sell_price: price, ..quotation("1", "1") };
            let grams = q.grams_for_currency(amount, PriceSide::Sell);
            let back = q.currency_for_grams(grams, PriceSide::Sell);
            let bound = price * dec("0.00005") + dec("0.005");
            prop_assert!((amount - back).abs() <= bound);
        }

        /// Rounding is idempotent at both scales
        #[test]
        fn prop_rounding_idempotent(amount in amount_strategy()) {
            prop_assert_eq!(round_grams(round_grams(amount)), round_grams(amount));
            prop_assert_eq!(round_currency(round_currency(amount)), round_currency(amount));
        }
    }
}

// ============================================================================
// Integration Test Helpers (for use with actual database)
// ============================================================================

#[cfg(test)]
mod integration_helpers {
    use super::*;

    /// Simulate resolving the quotation effective on a date: the most
    /// recent quote dated on or before it
    pub fn simulate_effective_quotation(
        quotes: &[(NaiveDate, Decimal)],
        as_of: NaiveDate,
    ) -> Result<Decimal, &'static str> {
        quotes
            .iter()
            .filter(|(date, _)| *date <= as_of)
            .max_by_key(|(date, _)| *date)
            .map(|(_, price)| *price)
            .ok_or("No quotation on or before the date")
    }

    /// Simulate the uniqueness rule for recording a quotation
    pub fn simulate_record_quotation(
        existing: &[(MetalKind, NaiveDate)],
        metal: MetalKind,
        date: NaiveDate,
    ) -> Result<(), &'static str> {
        if existing.iter().any(|(m, d)| *m == metal && *d == date) {
            Err("Quotation already exists for this metal and date")
        } else {
            Ok(())
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn test_effective_skips_future_quotes() {
        let quotes = [
            (day(1), dec("490.00")),
            (day(3), dec("500.00")),
            (day(10), dec("520.00")),
        ];
        let price = simulate_effective_quotation(&quotes, day(5)).unwrap();
        assert_eq!(price, dec("500.00"));
    }

    #[test]
    fn test_effective_on_exact_date() {
        let quotes = [(day(1), dec("490.00")), (day(3), dec("500.00"))];
        let price = simulate_effective_quotation(&quotes, day(3)).unwrap();
        assert_eq!(price, dec("500.00"));
    }

    #[test]
    fn test_effective_none_before_first_quote() {
        let quotes = [(day(3), dec("500.00"))];
        assert!(simulate_effective_quotation(&quotes, day(2)).is_err());
    }

    #[test]
    fn test_duplicate_quotation_rejected() {
        let existing = [(MetalKind::Au, day(3))];
        assert!(simulate_record_quotation(&existing, MetalKind::Au, day(3)).is_err());
        assert!(simulate_record_quotation(&existing, MetalKind::Ag, day(3)).is_ok());
        assert!(simulate_record_quotation(&existing, MetalKind::Au, day(4)).is_ok());
    }
}
