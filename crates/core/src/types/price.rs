//! Type-safe price representation using decimal arithmetic.
//!
//! Stripe amounts travel as integer cents; display values are decimal
//! dollars. `Price` keeps the decimal form and converts at the boundary so
//! no floating point ever touches money.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A monetary amount in the transaction currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Zero in the transaction currency.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a price from a decimal amount.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Create a price from an amount in cents.
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// The amount in cents, rounded half-up to the nearest cent.
    ///
    /// This is the form Stripe's API expects.
    #[must_use]
    pub fn to_cents(&self) -> i64 {
        let cents = (self.0 * Decimal::ONE_HUNDRED).round();
        cents.try_into().unwrap_or(i64::MAX)
    }

    /// The underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Whether this price is negative.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl std::ops::Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Mul<u32> for Price {
    type Output = Self;

    fn mul(self, qty: u32) -> Self {
        Self(self.0 * Decimal::from(qty))
    }
}

impl std::iter::Sum for Price {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, p| acc + p)
    }
}

impl From<Decimal> for Price {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_round_trip() {
        let p = Price::from_cents(14999);
        assert_eq!(p.amount(), Decimal::new(14999, 2));
        assert_eq!(p.to_cents(), 14999);
    }

    #[test]
    fn to_cents_rounds_sub_cent_amounts() {
        // 12.375 rounds half-up to 1238 cents
        let p = Price::new(Decimal::new(12375, 3));
        assert_eq!(p.to_cents(), 1238);
    }

    #[test]
    fn sum_and_scale() {
        let kit = Price::from_cents(14999);
        let film = Price::from_cents(2500);
        let total: Price = [kit * 2, film].into_iter().sum();
        assert_eq!(total.to_cents(), 32498);
    }

    #[test]
    fn display_is_dollars() {
        assert_eq!(Price::from_cents(16236).to_string(), "$162.36");
        assert_eq!(Price::ZERO.to_string(), "$0.00");
    }
}
