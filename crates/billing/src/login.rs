//! Student login gate.
//!
//! Two steps: credential check (access code + phone), then admission (the
//! student must be enrolled somewhere and hold at least one approved invoice).

use classbook_core::DomainError;

use crate::invoice::Invoice;
use crate::membership::ClassMembership;
use crate::registry::{phone_digits, Student};

/// Normalize a typed access code for lookup.
pub fn normalize_access_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Compare the supplied phone against the student's, digits only.
///
/// `student` is the lookup result for the supplied access code; a missing
/// student and a phone mismatch are indistinguishable to the caller.
pub fn check_credentials<'a>(
    student: Option<&'a Student>,
    phone: &str,
) -> Result<&'a Student, DomainError> {
    let student = student.ok_or(DomainError::Unauthorized)?;
    let supplied = phone_digits(phone);
    if supplied.is_empty() || supplied != phone_digits(&student.phone) {
        return Err(DomainError::Unauthorized);
    }
    Ok(student)
}

/// Admission rule for an authenticated student.
pub fn admit_student(
    memberships: &[ClassMembership],
    invoices: &[Invoice],
) -> Result<(), DomainError> {
    if !memberships.iter().any(|m| m.active) {
        return Err(DomainError::access_blocked("no active class membership"));
    }
    if !invoices.iter().any(Invoice::is_approved) {
        return Err(DomainError::access_blocked("awaiting payment approval"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use classbook_core::{ClassId, Money};

    use crate::discount::Discount;
    use crate::invoice::{ApprovalDecision, InvoiceKey, TuitionAmounts};

    fn test_student() -> Student {
        Student::register("Ana", "(11) 98765-4321", "R001".into(), Utc::now()).unwrap()
    }

    fn test_invoice(student: &Student, decision: Option<ApprovalDecision>) -> Invoice {
        let mut invoice = Invoice::issue(
            InvoiceKey::new("2025-03".parse().unwrap(), student.id, ClassId::new()),
            TuitionAmounts::compute(Money::from_cents(85_000), &Vec::<Discount>::new()),
            Utc::now(),
        );
        if let Some(d) = decision {
            invoice.decide(d, Utc::now());
        }
        invoice
    }

    #[test]
    fn credentials_match_on_digits_only() {
        let student = test_student();
        assert!(check_credentials(Some(&student), "11987654321").is_ok());
        assert!(check_credentials(Some(&student), "11 98765 4321").is_ok());
        assert_eq!(
            check_credentials(Some(&student), "11900000000").unwrap_err(),
            DomainError::Unauthorized
        );
        assert_eq!(check_credentials(None, "11987654321").unwrap_err(), DomainError::Unauthorized);
        assert_eq!(check_credentials(Some(&student), "").unwrap_err(), DomainError::Unauthorized);
    }

    #[test]
    fn admission_requires_active_membership_and_approved_invoice() {
        let student = test_student();
        let now = Utc::now();
        let active = ClassMembership::start(student.id, ClassId::new(), now);
        let mut ended = active.clone();
        ended.deactivate(now);

        let approved = test_invoice(&student, Some(ApprovalDecision::Approved));
        let pending = test_invoice(&student, None);
        let rejected = test_invoice(&student, Some(ApprovalDecision::Rejected));

        assert!(admit_student(&[active.clone()], &[pending.clone(), approved.clone()]).is_ok());

        match admit_student(&[ended], &[approved]) {
            Err(DomainError::AccessBlocked(msg)) if msg.contains("membership") => {}
            other => panic!("expected AccessBlocked, got {other:?}"),
        }
        match admit_student(&[active], &[pending, rejected]) {
            Err(DomainError::AccessBlocked(msg)) if msg.contains("approval") => {}
            other => panic!("expected AccessBlocked, got {other:?}"),
        }
    }

    #[test]
    fn access_code_is_case_insensitive() {
        assert_eq!(normalize_access_code(" r001 "), "R001");
    }
}
