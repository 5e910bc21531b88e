//! Money with precise decimal arithmetic
//!
//! This module provides a type-safe representation of monetary values
//! using rust_decimal for precise calculations without floating-point errors.
//! The ledger is single-currency; what matters here is exactness and the
//! settlement tolerance used for "is this balance effectively zero" checks.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};
use thiserror::Error;

/// Tolerance for monetary equality checks (one cent).
///
/// Every "fully paid" / "balance closed" decision in the settlement core
/// compares against this tolerance instead of raw equality.
pub const SETTLEMENT_TOLERANCE: Decimal = dec!(0.01);

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Overflow during calculation")]
    Overflow,
}

/// A monetary amount
///
/// Amounts are stored with 4 decimal places internally so intermediate
/// rate-times-weight arithmetic does not lose precision; persisted and
/// reported figures go through [`Money::round_to_cents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Creates a new Money value
    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp(4))
    }

    /// Creates Money from an integer amount of cents
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// The zero amount
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Returns the raw decimal amount
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns true if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Returns true if the amount is negative
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Returns the absolute value
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Rounds to whole cents using banker's rounding
    pub fn round_to_cents(&self) -> Self {
        Self(self.0.round_dp_with_strategy(
            2,
            rust_decimal::RoundingStrategy::MidpointNearestEven,
        ))
    }

    /// True if the two amounts differ by no more than the settlement tolerance
    pub fn approx_eq(&self, other: &Money) -> bool {
        (self.0 - other.0).abs() <= SETTLEMENT_TOLERANCE
    }

    /// True if this amount is an effectively-zero balance
    ///
    /// A remaining balance at or below one cent counts as settled.
    pub fn is_settled(&self) -> bool {
        self.0 <= SETTLEMENT_TOLERANCE
    }

    /// Checked addition that fails on decimal overflow
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Money::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction that fails on decimal overflow
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Money::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Multiplies by a scalar (e.g. quantity or weight)
    pub fn multiply(&self, factor: Decimal) -> Self {
        Self::new(self.0 * factor)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.0 + other.0)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.0 - other.0)
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money::new(amount)
    }
}
