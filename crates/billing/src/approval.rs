//! Approval workflow: an invoice decision and its enrollment side effect.
//!
//! Rejecting a tuition invoice revokes the student's enrollment in that class;
//! approving it (re)enrolls them. The decision is planned here as pure logic and
//! committed by the store as one atomic unit (invoice + membership).

use chrono::{DateTime, Utc};

use crate::invoice::{ApprovalDecision, ApprovalStatus, Invoice};
use crate::membership::ClassMembership;

/// What happens to the student's membership in the invoice's class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentChange {
    /// No membership to touch (rejection without an active membership).
    Unchanged,
    /// The active membership was closed.
    Deactivated(ClassMembership),
    /// An existing membership row was re-opened.
    Reactivated(ClassMembership),
    /// No prior row existed; a new active membership starts now.
    Enrolled(ClassMembership),
}

impl EnrollmentChange {
    /// Membership row to persist, if any.
    pub fn membership(&self) -> Option<&ClassMembership> {
        match self {
            EnrollmentChange::Unchanged => None,
            EnrollmentChange::Deactivated(m)
            | EnrollmentChange::Reactivated(m)
            | EnrollmentChange::Enrolled(m) => Some(m),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EnrollmentChange::Unchanged => "unchanged",
            EnrollmentChange::Deactivated(_) => "deactivated",
            EnrollmentChange::Reactivated(_) => "reactivated",
            EnrollmentChange::Enrolled(_) => "enrolled",
        }
    }
}

/// Result of deciding an invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub before: Invoice,
    pub invoice: Invoice,
    pub previous_status: ApprovalStatus,
    pub enrollment: EnrollmentChange,
}

/// Apply `decision` to `invoice` and plan the enrollment change.
///
/// `memberships` are the student's existing membership rows (any class; rows
/// for other classes are ignored). Re-deciding an already decided invoice is
/// allowed and re-triggers the side effect, so toggling the decision toggles
/// enrollment.
pub fn decide(
    invoice: &Invoice,
    decision: ApprovalDecision,
    memberships: &[ClassMembership],
    now: DateTime<Utc>,
) -> ApprovalOutcome {
    let mut updated = invoice.clone();
    let previous_status = updated.decide(decision, now);

    let student_id = invoice.student_id();
    let class_id = invoice.class_id();
    let linked = || memberships.iter().filter(move |m| m.links(student_id, class_id));

    let enrollment = match decision {
        ApprovalDecision::Rejected => match linked().find(|m| m.active) {
            Some(active) => {
                let mut closed = active.clone();
                closed.deactivate(now);
                EnrollmentChange::Deactivated(closed)
            }
            None => EnrollmentChange::Unchanged,
        },
        ApprovalDecision::Approved => {
            // Prefer the active row; otherwise the most recently started one.
            let existing = linked()
                .find(|m| m.active)
                .or_else(|| linked().max_by_key(|m| m.started_at));
            match existing {
                Some(row) => {
                    let mut reopened = row.clone();
                    reopened.reactivate();
                    EnrollmentChange::Reactivated(reopened)
                }
                None => EnrollmentChange::Enrolled(ClassMembership::start(student_id, class_id, now)),
            }
        }
    };

    ApprovalOutcome {
        before: invoice.clone(),
        invoice: updated,
        previous_status,
        enrollment,
    }
}
