use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{ClassId, DomainError, Entity, InvoiceId, Money, StudentId};

use crate::discount::{aggregate_discount, Discount};
use crate::period::Period;

/// Business identity of a monthly tuition invoice.
///
/// At most one invoice exists per (period, student, class); regeneration for the
/// same key refreshes amounts instead of creating a second row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvoiceKey {
    pub period: Period,
    pub student_id: StudentId,
    pub class_id: ClassId,
}

impl InvoiceKey {
    pub fn new(period: Period, student_id: StudentId, class_id: ClassId) -> Self {
        Self {
            period,
            student_id,
            class_id,
        }
    }

    /// `{period}-{studentId}-{classId}`, the flat string identity used by
    /// previously stored data. Only for interop; never parsed back.
    pub fn legacy_key(&self) -> String {
        format!("{}-{}-{}", self.period, self.student_id, self.class_id)
    }
}

/// Payment status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Overdue,
    Exempt,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Exempt => "exempt",
        }
    }
}

impl core::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "exempt" => Ok(Self::Exempt),
            other => Err(DomainError::validation(format!("unknown payment status '{other}'"))),
        }
    }
}

/// Administrative approval of an invoice; gates enrollment continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl core::str::FromStr for ApprovalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(DomainError::validation(format!("unknown approval status '{other}'"))),
        }
    }
}

/// An admin's decision on an invoice. There is no way back to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl From<ApprovalDecision> for ApprovalStatus {
    fn from(value: ApprovalDecision) -> Self {
        match value {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Rejected,
        }
    }
}

impl core::str::FromStr for ApprovalDecision {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "" => Err(DomainError::validation("decision is required")),
            other => Err(DomainError::validation(format!(
                "decision must be 'approved' or 'rejected' (got '{other}')"
            ))),
        }
    }
}

/// Gross, discount and net for one invoice.
///
/// Invariant: `discount = min(sum of contributions, gross)` and
/// `net = max(gross - discount, 0)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuitionAmounts {
    pub gross: Money,
    pub discount: Money,
    pub net: Money,
}

impl TuitionAmounts {
    pub fn compute<'a, I>(gross: Money, discounts: I) -> Self
    where
        I: IntoIterator<Item = &'a Discount>,
    {
        let discount = aggregate_discount(gross, discounts);
        Self {
            gross,
            discount,
            net: gross.saturating_sub(discount),
        }
    }
}

/// Monthly tuition invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub key: InvoiceKey,
    pub amounts: TuitionAmounts,
    pub due_date: NaiveDate,
    pub payment_status: PaymentStatus,
    pub approval_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Invoice {
    /// A freshly generated invoice: payment and approval both pending.
    pub fn issue(key: InvoiceKey, amounts: TuitionAmounts, now: DateTime<Utc>) -> Self {
        Self {
            id: InvoiceId::new(),
            key,
            amounts,
            due_date: key.period.due_date(),
            payment_status: PaymentStatus::Pending,
            approval_status: ApprovalStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Regeneration: recompute amounts and due date, keep statuses and identity.
    pub fn refresh(&mut self, amounts: TuitionAmounts, now: DateTime<Utc>) {
        self.amounts = amounts;
        self.due_date = self.key.period.due_date();
        self.updated_at = now;
    }

    /// Record an approval decision, returning the previous status.
    pub fn decide(&mut self, decision: ApprovalDecision, now: DateTime<Utc>) -> ApprovalStatus {
        let previous = self.approval_status;
        self.approval_status = decision.into();
        self.updated_at = now;
        previous
    }

    pub fn student_id(&self) -> StudentId {
        self.key.student_id
    }

    pub fn class_id(&self) -> ClassId {
        self.key.class_id
    }

    pub fn is_approved(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classbook_core::DiscountId;

    fn key() -> InvoiceKey {
        InvoiceKey::new("2025-03".parse().unwrap(), StudentId::new(), ClassId::new())
    }

    #[test]
    fn legacy_key_concatenates_period_student_class() {
        let k = key();
        assert_eq!(
            k.legacy_key(),
            format!("2025-03-{}-{}", k.student_id, k.class_id)
        );
    }

    #[test]
    fn issue_starts_pending_and_due_on_the_tenth() {
        let amounts = TuitionAmounts::compute(Money::from_cents(85_000), &Vec::<Discount>::new());
        let invoice = Invoice::issue(key(), amounts, Utc::now());

        assert_eq!(invoice.payment_status, PaymentStatus::Pending);
        assert_eq!(invoice.approval_status, ApprovalStatus::Pending);
        assert_eq!(invoice.due_date, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(invoice.amounts.net, Money::from_cents(85_000));
    }

    #[test]
    fn amounts_apply_percentage_and_fixed_discounts() {
        let student_id = StudentId::new();
        let mk = |p: Option<u32>, f: Option<i64>| Discount {
            id: DiscountId::new(),
            student_id,
            kind: "scholarship".to_string(),
            percentage: p,
            fixed_amount: f.map(Money::from_cents),
            created_at: Utc::now(),
        };
        let amounts = TuitionAmounts::compute(
            Money::from_cents(85_000),
            &[mk(Some(50), None), mk(None, Some(10_000))],
        );

        assert_eq!(amounts.discount, Money::from_cents(52_500));
        assert_eq!(amounts.net, Money::from_cents(32_500));
    }

    #[test]
    fn refresh_keeps_identity_and_statuses() {
        let now = Utc::now();
        let mut invoice = Invoice::issue(
            key(),
            TuitionAmounts::compute(Money::from_cents(10_000), &Vec::<Discount>::new()),
            now,
        );
        invoice.decide(ApprovalDecision::Approved, now);
        let id = invoice.id;

        invoice.refresh(
            TuitionAmounts::compute(Money::from_cents(12_000), &Vec::<Discount>::new()),
            now,
        );

        assert_eq!(invoice.id, id);
        assert_eq!(invoice.approval_status, ApprovalStatus::Approved);
        assert_eq!(invoice.amounts.gross, Money::from_cents(12_000));
    }

    #[test]
    fn decision_parsing() {
        assert_eq!("APPROVED".parse::<ApprovalDecision>().unwrap(), ApprovalDecision::Approved);
        assert_eq!("rejected".parse::<ApprovalDecision>().unwrap(), ApprovalDecision::Rejected);
        assert!(matches!("".parse::<ApprovalDecision>(), Err(DomainError::Validation(_))));
        assert!(matches!("pending".parse::<ApprovalDecision>(), Err(DomainError::Validation(_))));
    }
}
