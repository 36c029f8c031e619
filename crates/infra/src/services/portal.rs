use std::sync::Arc;

use tracing::{info, instrument, warn};

use classbook_billing::{
    admit_student, check_credentials, match_guardian, normalize_access_code, ClassMembership,
    Guardian, Student,
};
use classbook_core::{GuardianId, StudentId};

use super::billing::{attach_payments, InvoiceView};
use super::ServiceResult;
use crate::store::{sort_newest_due_first, BillingStore, InvoiceFilter, StoreError};

/// What a logged-in student sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentSummary {
    pub student: Student,
    /// Active memberships only.
    pub memberships: Vec<ClassMembership>,
    pub invoices: Vec<InvoiceView>,
}

/// One linked student as seen by a guardian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedStudent {
    pub student: Student,
    /// Active memberships only.
    pub memberships: Vec<ClassMembership>,
}

/// What a logged-in guardian sees: every linked student and all of their
/// invoices, newest due first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianSummary {
    pub guardian: Guardian,
    pub students: Vec<LinkedStudent>,
    pub invoices: Vec<InvoiceView>,
}

/// Student and guardian login gates and portal reads.
#[derive(Clone)]
pub struct PortalService {
    store: Arc<dyn BillingStore>,
}

impl PortalService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Authenticate a student by access code and phone.
    ///
    /// Unknown code and wrong phone both yield `Unauthorized`; a known student
    /// who is not enrolled or has no approved invoice yields `AccessBlocked`.
    #[instrument(skip(self, access_code, phone), err)]
    pub async fn student_login(&self, access_code: &str, phone: &str) -> ServiceResult<Student> {
        let code = normalize_access_code(access_code);
        let found = self.store.find_student_by_access_code(&code).await?;
        let student = check_credentials(found.as_ref(), phone)?.clone();

        let memberships = self.store.memberships_for_student(student.id).await?;
        let invoices = self
            .store
            .list_invoices(InvoiceFilter {
                student_id: Some(student.id),
                class_id: None,
            })
            .await?;

        if let Err(err) = admit_student(&memberships, &invoices) {
            warn!(student_id = %student.id, reason = %err, "student login blocked");
            return Err(err.into());
        }

        info!(student_id = %student.id, "student logged in");
        Ok(student)
    }

    pub async fn student_summary(&self, student_id: StudentId) -> ServiceResult<StudentSummary> {
        let student = self
            .store
            .get_student(student_id)
            .await?
            .ok_or(StoreError::NotFound("student"))?;

        let memberships = self
            .store
            .memberships_for_student(student_id)
            .await?
            .into_iter()
            .filter(|m| m.active)
            .collect();
        let invoices = self
            .store
            .list_invoices(InvoiceFilter {
                student_id: Some(student_id),
                class_id: None,
            })
            .await?;

        Ok(StudentSummary {
            student,
            memberships,
            invoices: attach_payments(self.store.as_ref(), invoices).await?,
        })
    }

    /// Authenticate a guardian by name and phone.
    ///
    /// Every failure (unknown name, wrong phone, no linked students) yields
    /// `Unauthorized`.
    #[instrument(skip(self, name, phone), err)]
    pub async fn guardian_login(&self, name: &str, phone: &str) -> ServiceResult<Guardian> {
        let candidates = self.store.find_guardians_by_name(name).await?;
        let guardian = match_guardian(&candidates, name, phone)?.clone();
        info!(guardian_id = %guardian.id, "guardian logged in");
        Ok(guardian)
    }

    pub async fn guardian_summary(&self, guardian_id: GuardianId) -> ServiceResult<GuardianSummary> {
        let guardian = self
            .store
            .get_guardian(guardian_id)
            .await?
            .ok_or(StoreError::NotFound("guardian"))?;

        let mut students = Vec::with_capacity(guardian.student_ids.len());
        let mut invoices = Vec::new();
        for &student_id in &guardian.student_ids {
            let Some(student) = self.store.get_student(student_id).await? else {
                continue;
            };
            let memberships = self
                .store
                .memberships_for_student(student_id)
                .await?
                .into_iter()
                .filter(|m| m.active)
                .collect();
            invoices.extend(
                self.store
                    .list_invoices(InvoiceFilter {
                        student_id: Some(student_id),
                        class_id: None,
                    })
                    .await?,
            );
            students.push(LinkedStudent {
                student,
                memberships,
            });
        }
        sort_newest_due_first(&mut invoices);

        Ok(GuardianSummary {
            guardian,
            students,
            invoices: attach_payments(self.store.as_ref(), invoices).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use classbook_billing::{ApprovalDecision, GenerateInvoices};
    use classbook_core::DomainError;

    use crate::audit::Actor;
    use crate::services::{NewClass, RegisterGuardian, RegisterStudent, ServiceError, Services};

    async fn registered(services: &Services, enroll: bool) -> Student {
        let now = Utc::now();
        let class = services
            .registry
            .create_class(
                &Actor::new("admin"),
                NewClass {
                    name: "Turma A".into(),
                    monthly_tuition: Some(85_000),
                    ..NewClass::default()
                },
                now,
            )
            .await
            .unwrap();
        let (student, _) = services
            .registry
            .register_student(
                &Actor::new("admin"),
                RegisterStudent {
                    name: "Ana".into(),
                    phone: "(11) 98765-4321".into(),
                    class_ids: if enroll { vec![class.id] } else { Vec::new() },
                },
                now,
            )
            .await
            .unwrap();
        if enroll {
            let cmd = GenerateInvoices::from_parts(Some(class.id), Some("2025-03"), None).unwrap();
            services.billing.generate_invoices(&Actor::new("admin"), cmd, now).await.unwrap();
        }
        student
    }

    #[tokio::test]
    async fn wrong_phone_and_unknown_code_are_unauthorized() {
        let services = Services::in_memory();
        let student = registered(&services, true).await;

        let err = services.portal.student_login(&student.access_code, "000").await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::Unauthorized));

        let err = services.portal.student_login("R999", "11987654321").await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::Unauthorized));
    }

    #[tokio::test]
    async fn login_is_blocked_until_an_invoice_is_approved() {
        let services = Services::in_memory();
        let student = registered(&services, true).await;

        match services.portal.student_login("r001", "11987654321").await {
            Err(ServiceError::Domain(DomainError::AccessBlocked(_))) => {}
            other => panic!("expected AccessBlocked, got {other:?}"),
        }

        let invoice = services
            .billing
            .list_invoices(InvoiceFilter::default())
            .await
            .unwrap()
            .remove(0)
            .invoice;
        services
            .billing
            .decide_invoice(&Actor::new("admin"), invoice.id, ApprovalDecision::Approved, Utc::now())
            .await
            .unwrap();

        let logged_in = services.portal.student_login("r001", "11 98765-4321").await.unwrap();
        assert_eq!(logged_in.id, student.id);
    }

    #[tokio::test]
    async fn student_without_membership_is_blocked() {
        let services = Services::in_memory();
        registered(&services, false).await;

        match services.portal.student_login("R001", "11987654321").await {
            Err(ServiceError::Domain(DomainError::AccessBlocked(msg))) if msg.contains("membership") => {}
            other => panic!("expected AccessBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn summary_lists_active_memberships_and_invoices() {
        let services = Services::in_memory();
        let student = registered(&services, true).await;

        let summary = services.portal.student_summary(student.id).await.unwrap();
        assert_eq!(summary.memberships.len(), 1);
        assert_eq!(summary.invoices.len(), 1);
        assert!(summary.invoices[0].payments.is_empty());

        let err = services.portal.student_summary(StudentId::new()).await.unwrap_err();
        assert_eq!(err, ServiceError::Store(StoreError::NotFound("student")));
    }

    async fn guardian_of(services: &Services, students: Vec<StudentId>) -> Guardian {
        services
            .registry
            .register_guardian(
                &Actor::new("admin"),
                RegisterGuardian {
                    name: "Maria Souza".into(),
                    phone: "(11) 91234-5678".into(),
                    student_ids: students,
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn guardian_login_requires_matching_phone_and_a_linked_student() {
        let services = Services::in_memory();
        let student = registered(&services, true).await;
        let linked = guardian_of(&services, vec![student.id]).await;

        let found = services.portal.guardian_login(" maria souza ", "11912345678").await.unwrap();
        assert_eq!(found.id, linked.id);

        let err = services.portal.guardian_login("Maria Souza", "11900000000").await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::Unauthorized));
        let err = services.portal.guardian_login("Nobody", "11912345678").await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::Unauthorized));

        let lonely = Services::in_memory();
        guardian_of(&lonely, Vec::new()).await;
        let err = lonely.portal.guardian_login("Maria Souza", "11912345678").await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::Unauthorized));
    }

    #[tokio::test]
    async fn guardian_summary_collects_linked_students_and_invoices() {
        let services = Services::in_memory();
        let student = registered(&services, true).await;
        let guardian = guardian_of(&services, vec![student.id]).await;

        let summary = services.portal.guardian_summary(guardian.id).await.unwrap();
        assert_eq!(summary.students.len(), 1);
        assert_eq!(summary.students[0].student.id, student.id);
        assert_eq!(summary.students[0].memberships.len(), 1);
        assert_eq!(summary.invoices.len(), 1);

        let err = services.portal.guardian_summary(GuardianId::new()).await.unwrap_err();
        assert_eq!(err, ServiceError::Store(StoreError::NotFound("guardian")));
    }
}
