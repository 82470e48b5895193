//! Daily metal quotations and currency/gram conversion

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metal::MetalKind;

/// Gram amounts are kept at four decimal places
pub const GRAM_SCALE: u32 = 4;

/// Currency amounts are kept at two decimal places
pub const CURRENCY_SCALE: u32 = 2;

/// Round a gram amount to the standard scale, half away from zero
pub fn round_grams(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(GRAM_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a currency amount to the standard scale, half away from zero
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Which side of a quotation applies to a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSide {
    /// Price the refinery pays when taking metal in
    Buy,
    /// Price the refinery charges when clients settle in currency
    Sell,
}

impl PriceSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSide::Buy => "buy",
            PriceSide::Sell => "sell",
        }
    }
}

/// One metal price record for an organization and calendar date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quotation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub metal: MetalKind,
    pub quote_date: NaiveDate,
    /// Currency per gram when buying metal from clients
    pub buy_price: Decimal,
    /// Currency per gram when selling metal or valuing settlements
    pub sell_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Quotation {
    pub fn price(&self, side: PriceSide) -> Decimal {
        match side {
            PriceSide::Buy => self.buy_price,
            PriceSide::Sell => self.sell_price,
        }
    }

    /// Convert a currency amount into grams at this quotation.
    ///
    /// Returns zero when the price is zero so callers never divide by zero.
    pub fn grams_for_currency(&self, amount: Decimal, side: PriceSide) -> Decimal {
        let price = self.price(side);
        if price.is_zero() {
            return Decimal::ZERO;
        }
        round_grams(amount / price)
    }

    /// Convert a gram amount into currency at this quotation
    pub fn currency_for_grams(&self, grams: Decimal, side: PriceSide) -> Decimal {
        round_currency(grams * self.price(side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn quotation(buy: &str, sell: &str) -> Quotation {
        Quotation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            metal: MetalKind::Au,
            quote_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            buy_price: dec(buy),
            sell_price: dec(sell),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_grams_for_currency_uses_requested_side() {
        let q = quotation("480.00", "500.00");
        assert_eq!(q.grams_for_currency(dec("10000"), PriceSide::Sell), dec("20.0000"));
        assert_eq!(q.grams_for_currency(dec("4800"), PriceSide::Buy), dec("10.0000"));
    }

    #[test]
    fn test_grams_round_half_away_from_zero() {
        let q = quotation("480.00", "3.00");
        // 1 / 3 = 0.33333... rounds to 0.3333
        assert_eq!(q.grams_for_currency(dec("1"), PriceSide::Sell), dec("0.3333"));
        // 0.00005 boundary rounds up
        assert_eq!(round_grams(dec("0.00005")), dec("0.0001"));
    }

    #[test]
    fn test_zero_price_yields_zero_grams() {
        let q = quotation("0", "0");
        assert_eq!(q.grams_for_currency(dec("10000"), PriceSide::Sell), Decimal::ZERO);
    }

    #[test]
    fn test_currency_for_grams() {
        let q = quotation("480.00", "500.00");
        assert_eq!(q.currency_for_grams(dec("20.0000"), PriceSide::Sell), dec("10000.00"));
    }
}
