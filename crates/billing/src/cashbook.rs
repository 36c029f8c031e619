//! School cash book.
//!
//! Manual income and expense entries, plus the enrollment-fee revenue implied
//! by class memberships. Nothing here touches invoices: tuition flows are
//! tracked by the invoice module and the cash book sits beside it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{CashEntryId, DomainError, Entity, Money};

use crate::membership::ClassMembership;
use crate::period::Period;
use crate::registry::ClassCohort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Income,
    Expense,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Income => "income",
            EntryKind::Expense => "expense",
        }
    }
}

impl core::str::FromStr for EntryKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(DomainError::validation(format!("unknown entry kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryCategory {
    Fixed,
    Variable,
}

impl EntryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryCategory::Fixed => "fixed",
            EntryCategory::Variable => "variable",
        }
    }
}

impl core::str::FromStr for EntryCategory {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "variable" => Ok(Self::Variable),
            other => Err(DomainError::validation(format!("unknown entry category '{other}'"))),
        }
    }
}

/// One manual cash book line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashEntry {
    pub id: CashEntryId,
    pub kind: EntryKind,
    pub category: EntryCategory,
    pub description: String,
    pub amount: Money,
    pub occurred_on: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for CashEntry {
    type Id = CashEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Submitted fields of a cash entry, used for both create and full update.
///
/// Fields are optional so that a missing one is reported as a validation
/// error rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CashEntryInput {
    pub kind: Option<EntryKind>,
    pub category: Option<EntryCategory>,
    pub description: Option<String>,
    pub amount: Option<i64>,
    pub occurred_on: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

struct EntryFields {
    kind: EntryKind,
    category: EntryCategory,
    description: String,
    amount: Money,
    occurred_on: NaiveDate,
    notes: Option<String>,
}

impl CashEntryInput {
    fn validate(self) -> Result<EntryFields, DomainError> {
        let kind = self
            .kind
            .ok_or_else(|| DomainError::validation("kind is required"))?;
        let category = self
            .category
            .ok_or_else(|| DomainError::validation("category is required"))?;
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| DomainError::validation("description is required"))?
            .to_string();
        let amount = self
            .amount
            .ok_or_else(|| DomainError::validation("amount is required"))?;
        let amount = Money::positive(amount, "amount")?;
        let occurred_on = self
            .occurred_on
            .ok_or_else(|| DomainError::validation("occurred_on is required"))?;
        let notes = self
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(EntryFields {
            kind,
            category,
            description,
            amount,
            occurred_on,
            notes,
        })
    }
}

impl CashEntry {
    pub fn record(input: CashEntryInput, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let fields = input.validate()?;
        Ok(Self {
            id: CashEntryId::new(),
            kind: fields.kind,
            category: fields.category,
            description: fields.description,
            amount: fields.amount,
            occurred_on: fields.occurred_on,
            notes: fields.notes,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace every field, keeping identity and creation time.
    pub fn revise(&self, input: CashEntryInput, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let fields = input.validate()?;
        Ok(Self {
            id: self.id,
            kind: fields.kind,
            category: fields.category,
            description: fields.description,
            amount: fields.amount,
            occurred_on: fields.occurred_on,
            notes: fields.notes,
            created_at: self.created_at,
            updated_at: now,
        })
    }
}

/// Optional filters for cash book listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CashEntryFilter {
    pub period: Option<Period>,
    pub kind: Option<EntryKind>,
    pub category: Option<EntryCategory>,
}

impl CashEntryFilter {
    pub fn matches(&self, entry: &CashEntry) -> bool {
        self.period.is_none_or(|p| p.contains(entry.occurred_on))
            && self.kind.is_none_or(|k| entry.kind == k)
            && self.category.is_none_or(|c| entry.category == c)
    }
}

/// Enrollment fees owed for active memberships.
///
/// Each class with a non-zero enrollment fee contributes its fee once per
/// active membership. With a period, only memberships that started within it
/// count; without one, every active membership does.
pub fn enrollment_fee_total(
    classes: &[ClassCohort],
    memberships: &[ClassMembership],
    period: Option<Period>,
) -> Result<Money, DomainError> {
    let overflow = || DomainError::invariant("enrollment fee total overflows");

    let mut total = Money::ZERO;
    for class in classes {
        let fee = class.plan.map(|p| p.enrollment_fee).unwrap_or(Money::ZERO);
        if fee == Money::ZERO {
            continue;
        }
        let count = memberships
            .iter()
            .filter(|m| m.active && m.class_id == class.id)
            .filter(|m| period.is_none_or(|p| p.contains(m.started_at.date_naive())))
            .count();
        let count = i64::try_from(count).map_err(|_| overflow())?;
        let owed = fee.cents().checked_mul(count).ok_or_else(overflow)?;
        total = total
            .checked_add(Money::from_cents(owed))
            .ok_or_else(overflow)?;
    }
    Ok(total)
}

/// Cash book view for one listing: the entries and their totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashSummary {
    pub entries: Vec<CashEntry>,
    pub income: Money,
    pub expenses: Money,
    pub enrollment_fees: Money,
    /// `income + enrollment_fees - expenses`; may be negative.
    pub balance: Money,
}

impl CashSummary {
    pub fn compute(entries: Vec<CashEntry>, enrollment_fees: Money) -> Result<Self, DomainError> {
        let overflow = || DomainError::invariant("cash book totals overflow");
        let total_of = |kind: EntryKind| {
            Money::checked_sum(entries.iter().filter(|e| e.kind == kind).map(|e| e.amount))
                .ok_or_else(overflow)
        };
        let income = total_of(EntryKind::Income)?;
        let expenses = total_of(EntryKind::Expense)?;
        let balance = income
            .cents()
            .checked_add(enrollment_fees.cents())
            .and_then(|c| c.checked_sub(expenses.cents()))
            .ok_or_else(overflow)?;

        Ok(Self {
            entries,
            income,
            expenses,
            enrollment_fees,
            balance: Money::from_cents(balance),
        })
    }
}
