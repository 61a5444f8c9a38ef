use crate::error::{LifecycleError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

/// Number of decimal places kept for every monetary value.
pub const CURRENCY_SCALE: u32 = 2;

/// A monetary quantity (fine totals, cumulative paid amounts, remaining balances).
///
/// Wraps `rust_decimal::Decimal` so that no amount ever goes through binary floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

/// A strictly positive amount supplied by a caller (payment, majoration, amended total).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LifecycleError::validation("Amount must be positive"))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Rounds to currency precision. Fails when nothing is left after rounding.
    pub fn rounded(self) -> Result<Self> {
        Self::new(Money::from(self).rounded().value())
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LifecycleError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Rounds to currency precision, midpoint away from zero.
    pub fn rounded(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    pub fn scaled(self, factor: Decimal) -> Self {
        Self(self.0 * factor).rounded()
    }

    /// `self - rhs`, floored at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs >= self { Self::ZERO } else { Self(self.0 - rhs.0) }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, m| acc + m)
    }
}
