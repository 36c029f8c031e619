//! Monthly invoice generation for one class.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{ClassId, DomainError, Money, StudentId};

use crate::discount::Discount;
use crate::invoice::{Invoice, InvoiceKey, TuitionAmounts};
use crate::period::Period;
use crate::registry::ClassCohort;

/// Command: generate tuition invoices for every enrolled student of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateInvoices {
    pub class_id: ClassId,
    pub period: Period,
    /// Replaces the class plan's monthly tuition when set.
    pub gross_override: Option<Money>,
}

impl GenerateInvoices {
    pub fn new(
        class_id: ClassId,
        period: Period,
        gross_override: Option<i64>,
    ) -> Result<Self, DomainError> {
        let gross_override = gross_override
            .map(|cents| Money::non_negative(cents, "gross_override"))
            .transpose()?;
        Ok(Self {
            class_id,
            period,
            gross_override,
        })
    }

    /// Build from loosely-typed request fields, reporting missing ones.
    pub fn from_parts(
        class_id: Option<ClassId>,
        period: Option<&str>,
        gross_override: Option<i64>,
    ) -> Result<Self, DomainError> {
        let class_id = class_id.ok_or_else(|| DomainError::validation("class_id is required"))?;
        let period: Period = period
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DomainError::validation("period is required"))?
            .parse()?;
        Self::new(class_id, period, gross_override)
    }

    /// Override, else the plan's monthly tuition, else zero.
    pub fn gross_for(&self, class: &ClassCohort) -> Money {
        self.gross_override
            .or_else(|| class.plan.as_ref().map(|p| p.monthly_tuition))
            .unwrap_or(Money::ZERO)
    }
}

/// Build the full batch of invoices to upsert.
///
/// One invoice per student in `student_ids` (deduplicated, in sorted order).
/// Where `existing` already holds an invoice for the same key it is refreshed
/// in place, so its id and statuses survive; otherwise a new pending invoice is
/// issued. `discounts` may contain records for any student.
pub fn plan_invoice_batch(
    cmd: &GenerateInvoices,
    class: &ClassCohort,
    student_ids: &[StudentId],
    discounts: &[Discount],
    existing: &[Invoice],
    now: DateTime<Utc>,
) -> Vec<Invoice> {
    let gross = cmd.gross_for(class);

    let mut by_student: HashMap<StudentId, Vec<&Discount>> = HashMap::new();
    for d in discounts {
        by_student.entry(d.student_id).or_default().push(d);
    }

    let existing: HashMap<InvoiceKey, &Invoice> = existing.iter().map(|i| (i.key, i)).collect();

    let mut students = student_ids.to_vec();
    students.sort();
    students.dedup();

    students
        .into_iter()
        .map(|student_id| {
            let key = InvoiceKey::new(cmd.period, student_id, class.id);
            let records = by_student.get(&student_id).map(Vec::as_slice).unwrap_or(&[]);
            let amounts = TuitionAmounts::compute(gross, records.iter().copied());

            match existing.get(&key) {
                Some(current) => {
                    let mut refreshed = (*current).clone();
                    refreshed.refresh(amounts, now);
                    refreshed
                }
                None => Invoice::issue(key, amounts, now),
            }
        })
        .collect()
}
