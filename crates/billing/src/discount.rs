//! Scholarship / discount records and the discount aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{DiscountId, DomainError, Entity, Money, StudentId};

/// A discount granted to a student.
///
/// A record may carry a percentage, a fixed amount, or both; every component
/// that is set contributes to the deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub id: DiscountId,
    pub student_id: StudentId,
    /// Free-form label, e.g. "scholarship" or "sibling".
    pub kind: String,
    /// Whole percent of the gross amount (0..=100).
    pub percentage: Option<u32>,
    pub fixed_amount: Option<Money>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Discount {
    type Id = DiscountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for creating a discount record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDiscount {
    pub student_id: StudentId,
    pub kind: String,
    pub percentage: Option<u32>,
    pub fixed_amount: Option<i64>,
}

impl Discount {
    pub fn create(input: NewDiscount, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let kind = input.kind.trim();
        if kind.is_empty() {
            return Err(DomainError::validation("discount kind is required"));
        }
        if let Some(p) = input.percentage
            && p > 100
        {
            return Err(DomainError::validation(
                "discount percentage must be within 0..=100",
            ));
        }
        let fixed_amount = input
            .fixed_amount
            .map(|cents| Money::non_negative(cents, "discount fixed_amount"))
            .transpose()?;

        Ok(Self {
            id: DiscountId::new(),
            student_id: input.student_id,
            kind: kind.to_string(),
            percentage: input.percentage,
            fixed_amount,
            created_at: now,
        })
    }

    /// Deduction this record contributes against `gross`, before clamping.
    pub fn contribution(&self, gross: Money) -> i128 {
        let mut total: i128 = 0;
        if let Some(p) = self.percentage {
            total += percent_of(gross, p);
        }
        if let Some(fixed) = self.fixed_amount {
            total += fixed.cents() as i128;
        }
        total
    }
}

/// `round(gross * p / 100)`, halves rounded up.
fn percent_of(gross: Money, p: u32) -> i128 {
    let scaled = gross.cents().max(0) as i128 * p as i128;
    (scaled + 50) / 100
}

/// Combine a student's discount records into one deduction for `gross`.
///
/// Contributions are summed across records and clamped to `[0, gross]`, so a
/// discount never drives the net amount below zero. No records → zero.
pub fn aggregate_discount<'a, I>(gross: Money, records: I) -> Money
where
    I: IntoIterator<Item = &'a Discount>,
{
    let ceiling = gross.cents().max(0) as i128;
    let total: i128 = records
        .into_iter()
        .map(|d| d.contribution(gross))
        .fold(0i128, |acc, c| acc.saturating_add(c));

    Money::from_cents(total.clamp(0, ceiling) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn discount(percentage: Option<u32>, fixed: Option<i64>) -> Discount {
        Discount {
            id: DiscountId::new(),
            student_id: StudentId::new(),
            kind: "scholarship".to_string(),
            percentage,
            fixed_amount: fixed.map(Money::from_cents),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn no_records_yields_zero() {
        assert_eq!(aggregate_discount(Money::from_cents(85_000), &Vec::<Discount>::new()), Money::ZERO);
    }

    #[test]
    fn half_scholarship_on_monthly_tuition() {
        let records = [discount(Some(50), None)];
        assert_eq!(
            aggregate_discount(Money::from_cents(85_000), &records),
            Money::from_cents(42_500)
        );
    }

    #[test]
    fn percentage_and_fixed_on_separate_records_are_summed() {
        let records = [discount(Some(50), None), discount(None, Some(10_000))];
        assert_eq!(
            aggregate_discount(Money::from_cents(85_000), &records),
            Money::from_cents(52_500)
        );
    }

    #[test]
    fn one_record_may_contribute_both_components() {
        let records = [discount(Some(50), Some(10_000))];
        assert_eq!(
            aggregate_discount(Money::from_cents(85_000), &records),
            Money::from_cents(52_500)
        );
    }

    #[test]
    fn total_is_clamped_to_gross() {
        let records = [discount(Some(80), None), discount(None, Some(50_000))];
        assert_eq!(
            aggregate_discount(Money::from_cents(85_000), &records),
            Money::from_cents(85_000)
        );
    }

    #[test]
    fn percentage_rounds_half_up() {
        // 333 * 15 / 100 = 49.95 -> 50; 10 * 5 / 100 = 0.5 -> 1
        assert_eq!(aggregate_discount(Money::from_cents(333), &[discount(Some(15), None)]), Money::from_cents(50));
        assert_eq!(aggregate_discount(Money::from_cents(10), &[discount(Some(5), None)]), Money::from_cents(1));
    }

    #[test]
    fn create_validates_input() {
        let student_id = StudentId::new();
        let base = NewDiscount {
            student_id,
            kind: "sibling".to_string(),
            percentage: Some(10),
            fixed_amount: None,
        };
        assert!(Discount::create(base.clone(), Utc::now()).is_ok());

        let blank = NewDiscount { kind: "  ".to_string(), ..base.clone() };
        assert!(matches!(Discount::create(blank, Utc::now()), Err(DomainError::Validation(_))));

        let too_much = NewDiscount { percentage: Some(101), ..base.clone() };
        assert!(matches!(Discount::create(too_much, Utc::now()), Err(DomainError::Validation(_))));

        let negative = NewDiscount { fixed_amount: Some(-5), ..base.clone() };
        assert!(matches!(Discount::create(negative, Utc::now()), Err(DomainError::Validation(_))));

        let huge = NewDiscount { fixed_amount: Some(i64::MAX), ..base };
        assert!(matches!(Discount::create(huge, Utc::now()), Err(DomainError::Validation(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the aggregated deduction always lies within [0, gross].
        #[test]
        fn aggregate_is_bounded_by_gross(
            gross in 0i64..10_000_000,
            parts in prop::collection::vec(
                (prop::option::of(0u32..=100), prop::option::of(0i64..5_000_000)),
                0..8,
            )
        ) {
            let records: Vec<Discount> = parts
                .into_iter()
                .map(|(p, f)| discount(p, f))
                .collect();
            let total = aggregate_discount(Money::from_cents(gross), &records);

            prop_assert!(total >= Money::ZERO);
            prop_assert!(total <= Money::from_cents(gross));
        }
    }
}
