//! Value object trait: equality by value, not identity.
//!
//! Value objects have **no identity**; they are defined entirely by their
//! attribute values. Two value objects with the same values are equal.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by value. To "modify" one, build a
/// new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Amount of money in the smallest currency unit (cents).
///
/// Tuition, discounts and payments are all integer cents; there is no
/// multi-currency support.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Self = Self(0);

    /// Largest amount accepted from input: 100 million in major units.
    ///
    /// Any realistic number of bounded amounts sums well inside `i64`.
    pub const MAX: Self = Self(10_000_000_000);

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Build an amount in `0..=MAX`.
    pub fn non_negative(cents: i64, field: &str) -> DomainResult<Self> {
        if cents < 0 {
            return Err(DomainError::validation(format!("{field} must not be negative")));
        }
        Self::at_most_max(cents, field)
    }

    /// Build an amount in `1..=MAX`.
    pub fn positive(cents: i64, field: &str) -> DomainResult<Self> {
        if cents <= 0 {
            return Err(DomainError::validation(format!("{field} must be positive")));
        }
        Self::at_most_max(cents, field)
    }

    fn at_most_max(cents: i64, field: &str) -> DomainResult<Self> {
        if cents > Self::MAX.0 {
            return Err(DomainError::validation(format!(
                "{field} must not exceed {}",
                Self::MAX
            )));
        }
        Ok(Self(cents))
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    /// Subtraction floored at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0).max(0))
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Sum of `amounts`, or `None` if the total leaves `i64`.
    pub fn checked_sum<I: IntoIterator<Item = Self>>(amounts: I) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
