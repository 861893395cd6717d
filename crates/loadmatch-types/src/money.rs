//! Fixed-point money helpers.
//!
//! Every monetary value is a `Decimal` with two fraction digits. Commission
//! is always recomputed from the shipment price and the wallet's rate, never
//! cached.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{LoadmatchError, Result, constants};

/// Normalise a value to two fraction digits (midpoint away from zero).
#[must_use]
pub fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(constants::MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate a strictly positive amount and normalise it.
pub fn positive(value: Decimal, what: &str) -> Result<Decimal> {
    if value <= Decimal::ZERO {
        return Err(LoadmatchError::validation(format!(
            "{what} must be positive, got {value}"
        )));
    }
    let rounded = round(value);
    if rounded.is_zero() {
        return Err(LoadmatchError::validation(format!(
            "{what} rounds to zero at {} fraction digits",
            constants::MONEY_SCALE
        )));
    }
    Ok(rounded)
}

/// How a shipment price splits between platform and carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    /// Platform cut: `price × rate / 100`, rounded.
    pub commission: Decimal,
    /// What the carrier receives: `price − commission`.
    pub payout: Decimal,
}

impl CommissionSplit {
    /// Split `price` at `rate_percent` (e.g. `1` for 1 %).
    #[must_use]
    pub fn compute(price: Decimal, rate_percent: Decimal) -> Self {
        let commission = round(price * rate_percent / Decimal::ONE_HUNDRED);
        Self {
            commission,
            payout: round(price - commission),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_two_digits() {
        assert_eq!(round(Decimal::new(12345, 3)), Decimal::new(1235, 2)); // 12.345 -> 12.35
        assert_eq!(round(Decimal::new(12344, 3)), Decimal::new(1234, 2));
    }

    #[test]
    fn positive_rejects_zero_and_negative() {
        assert!(positive(Decimal::ZERO, "price").is_err());
        assert!(positive(Decimal::new(-1, 0), "price").is_err());
        assert!(positive(Decimal::new(1, 3), "price").is_err()); // 0.001 rounds to 0
        assert_eq!(
            positive(Decimal::new(5005, 1), "price").unwrap(),
            Decimal::new(50050, 2)
        );
    }

    #[test]
    fn one_percent_of_nine_hundred() {
        let split = CommissionSplit::compute(Decimal::new(90000, 2), Decimal::ONE);
        assert_eq!(split.commission, Decimal::new(900, 2));
        assert_eq!(split.payout, Decimal::new(89100, 2));
    }

    #[test]
    fn split_always_sums_to_price() {
        let price = Decimal::new(33333, 2); // 333.33
        let split = CommissionSplit::compute(price, Decimal::new(25, 1)); // 2.5 %
        assert_eq!(split.commission, Decimal::new(833, 2)); // 8.33325 -> 8.33
        assert_eq!(split.commission + split.payout, price);
    }
}
