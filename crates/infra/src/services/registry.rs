use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use classbook_billing::{
    next_access_code, ClassCohort, ClassMembership, Discount, FinancialPlan, Guardian, NewDiscount,
    Student,
};
use classbook_core::{ClassId, GuardianId, StudentId};

use super::{record_audit, ServiceResult};
use crate::audit::{actions, Actor, AuditEntry, AuditSink};
use crate::store::{BillingStore, StoreError};

/// Input for creating a class.
#[derive(Debug, Clone, Default)]
pub struct NewClass {
    pub name: String,
    pub enrollment_fee: Option<i64>,
    pub monthly_tuition: Option<i64>,
}

/// Input for registering a student.
#[derive(Debug, Clone, Default)]
pub struct RegisterStudent {
    pub name: String,
    pub phone: String,
    pub class_ids: Vec<ClassId>,
}

/// Input for registering a guardian.
#[derive(Debug, Clone, Default)]
pub struct RegisterGuardian {
    pub name: String,
    pub phone: String,
    pub student_ids: Vec<StudentId>,
}

/// Classes, students, guardians and discount records.
#[derive(Clone)]
pub struct RegistryService {
    store: Arc<dyn BillingStore>,
    audit: Arc<dyn AuditSink>,
}

impl RegistryService {
    pub fn new(store: Arc<dyn BillingStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    #[instrument(skip(self, input, now), fields(name = %input.name), err)]
    pub async fn create_class(
        &self,
        actor: &Actor,
        input: NewClass,
        now: DateTime<Utc>,
    ) -> ServiceResult<ClassCohort> {
        let plan = match (input.enrollment_fee, input.monthly_tuition) {
            (None, None) => None,
            (fee, tuition) => Some(FinancialPlan::new(fee.unwrap_or(0), tuition.unwrap_or(0))?),
        };
        let class = ClassCohort::create(&input.name, plan, now)?;
        self.store.insert_class(&class).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(actor, actions::CREATE, "class", Some(class.id.to_string()), now)
                .with_snapshots(None::<&()>, Some(&class)),
        )
        .await;
        info!(class_id = %class.id, "class created");
        Ok(class)
    }

    pub async fn list_classes(&self) -> ServiceResult<Vec<ClassCohort>> {
        Ok(self.store.list_classes().await?)
    }

    /// Register a student with a fresh access code and optional initial
    /// class memberships.
    #[instrument(skip(self, input, now), fields(classes = input.class_ids.len()), err)]
    pub async fn register_student(
        &self,
        actor: &Actor,
        input: RegisterStudent,
        now: DateTime<Utc>,
    ) -> ServiceResult<(Student, Vec<ClassMembership>)> {
        let codes = self.store.access_codes().await?;
        let access_code = next_access_code(codes.iter().map(String::as_str));
        let student = Student::register(&input.name, &input.phone, access_code, now)?;

        let mut class_ids = input.class_ids;
        class_ids.sort();
        class_ids.dedup();
        let memberships: Vec<ClassMembership> = class_ids
            .into_iter()
            .map(|class_id| ClassMembership::start(student.id, class_id, now))
            .collect();

        self.store.insert_student(&student, &memberships).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(actor, actions::CREATE, "student", Some(student.id.to_string()), now)
                .with_snapshots(None::<&()>, Some(&student)),
        )
        .await;
        info!(student_id = %student.id, access_code = %student.access_code, "student registered");
        Ok((student, memberships))
    }

    pub async fn list_students(&self, include_inactive: bool) -> ServiceResult<Vec<Student>> {
        Ok(self.store.list_students(include_inactive).await?)
    }

    #[instrument(skip(self, input, now), fields(students = input.student_ids.len()), err)]
    pub async fn register_guardian(
        &self,
        actor: &Actor,
        input: RegisterGuardian,
        now: DateTime<Utc>,
    ) -> ServiceResult<Guardian> {
        let guardian = Guardian::register(&input.name, &input.phone, input.student_ids, now)?;
        self.store.insert_guardian(&guardian).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(actor, actions::CREATE, "guardian", Some(guardian.id.to_string()), now)
                .with_snapshots(None::<&()>, Some(&guardian)),
        )
        .await;
        info!(guardian_id = %guardian.id, "guardian registered");
        Ok(guardian)
    }

    pub async fn list_guardians(&self) -> ServiceResult<Vec<Guardian>> {
        Ok(self.store.list_guardians().await?)
    }

    /// Link one more student to a guardian. Linking twice is a no-op and is
    /// not audited.
    #[instrument(skip(self, now), err)]
    pub async fn link_guardian_student(
        &self,
        actor: &Actor,
        guardian_id: GuardianId,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> ServiceResult<Guardian> {
        let before = self
            .store
            .get_guardian(guardian_id)
            .await?
            .ok_or(StoreError::NotFound("guardian"))?;
        let after = self.store.link_guardian_student(guardian_id, student_id).await?;

        if after.student_ids.len() != before.student_ids.len() {
            record_audit(
                self.audit.as_ref(),
                AuditEntry::new(actor, actions::UPDATE, "guardian", Some(guardian_id.to_string()), now)
                    .with_snapshots(Some(&before), Some(&after)),
            )
            .await;
        }
        Ok(after)
    }

    #[instrument(skip(self, input, now), fields(student_id = %input.student_id), err)]
    pub async fn create_discount(
        &self,
        actor: &Actor,
        input: NewDiscount,
        now: DateTime<Utc>,
    ) -> ServiceResult<Discount> {
        let discount = Discount::create(input, now)?;
        self.store.insert_discount(&discount).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(actor, actions::CREATE, "discount", Some(discount.id.to_string()), now)
                .with_snapshots(None::<&()>, Some(&discount)),
        )
        .await;
        Ok(discount)
    }

    pub async fn list_discounts(&self, student_id: Option<StudentId>) -> ServiceResult<Vec<Discount>> {
        Ok(self.store.list_discounts(student_id).await?)
    }
}
