use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use classbook_billing::{
    decide, plan_invoice_batch, same_name, settle, total_paid, ApprovalDecision, ApprovalOutcome,
    CashEntry, CashEntryFilter, ClassCohort, ClassMembership, Discount, GenerateInvoices,
    Guardian, Invoice, InvoiceKey, Payment, Student, StudentStatus,
};
use classbook_core::{CashEntryId, ClassId, DiscountId, GuardianId, InvoiceId, StudentId};

use super::{
    sort_latest_entry_first, sort_newest_due_first, BillingStore, InvoiceFilter, StoreError,
};

#[derive(Debug, Default)]
struct State {
    classes: HashMap<ClassId, ClassCohort>,
    students: HashMap<StudentId, Student>,
    memberships: Vec<ClassMembership>,
    discounts: HashMap<DiscountId, Discount>,
    invoices: HashMap<InvoiceId, Invoice>,
    invoice_keys: HashMap<InvoiceKey, InvoiceId>,
    payments: Vec<Payment>,
    guardians: HashMap<GuardianId, Guardian>,
    cash_entries: HashMap<CashEntryId, CashEntry>,
}

impl State {
    fn upsert_membership(&mut self, membership: ClassMembership) {
        match self.memberships.iter_mut().find(|m| m.id == membership.id) {
            Some(slot) => *slot = membership,
            None => self.memberships.push(membership),
        }
    }

    fn upsert_invoice(&mut self, invoice: Invoice) -> Invoice {
        // The key index wins over the incoming id: a refreshed invoice keeps the
        // identity it was first stored with.
        let id = *self.invoice_keys.entry(invoice.key).or_insert(invoice.id);
        let stored = Invoice { id, ..invoice };
        self.invoices.insert(id, stored.clone());
        stored
    }
}

/// In-memory billing store.
///
/// Intended for tests/dev. A single lock guards all tables, so every unit of
/// work is serialized and atomic.
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    state: RwLock<State>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn insert_class(&self, class: &ClassCohort) -> Result<(), StoreError> {
        self.write()?.classes.insert(class.id, class.clone());
        Ok(())
    }

    async fn get_class(&self, id: ClassId) -> Result<Option<ClassCohort>, StoreError> {
        Ok(self.read()?.classes.get(&id).cloned())
    }

    async fn list_classes(&self) -> Result<Vec<ClassCohort>, StoreError> {
        let mut classes: Vec<_> = self.read()?.classes.values().cloned().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(classes)
    }

    async fn access_codes(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()?
            .students
            .values()
            .map(|s| s.access_code.clone())
            .collect())
    }

    async fn insert_student(
        &self,
        student: &Student,
        memberships: &[ClassMembership],
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state
            .students
            .values()
            .any(|s| s.access_code == student.access_code)
        {
            return Err(StoreError::Conflict(format!(
                "access code {} already in use",
                student.access_code
            )));
        }
        if memberships
            .iter()
            .any(|m| !state.classes.contains_key(&m.class_id))
        {
            return Err(StoreError::NotFound("class"));
        }

        state.students.insert(student.id, student.clone());
        for m in memberships {
            state.upsert_membership(m.clone());
        }
        Ok(())
    }

    async fn get_student(&self, id: StudentId) -> Result<Option<Student>, StoreError> {
        Ok(self.read()?.students.get(&id).cloned())
    }

    async fn find_student_by_access_code(&self, code: &str) -> Result<Option<Student>, StoreError> {
        Ok(self
            .read()?
            .students
            .values()
            .find(|s| s.access_code == code)
            .cloned())
    }

    async fn list_students(&self, include_inactive: bool) -> Result<Vec<Student>, StoreError> {
        let mut students: Vec<_> = self
            .read()?
            .students
            .values()
            .filter(|s| include_inactive || s.status == StudentStatus::Active)
            .cloned()
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(students)
    }

    async fn memberships_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<ClassMembership>, StoreError> {
        Ok(self
            .read()?
            .memberships
            .iter()
            .filter(|m| m.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn active_memberships(&self) -> Result<Vec<ClassMembership>, StoreError> {
        Ok(self
            .read()?
            .memberships
            .iter()
            .filter(|m| m.active)
            .cloned()
            .collect())
    }

    async fn insert_guardian(&self, guardian: &Guardian) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if guardian
            .student_ids
            .iter()
            .any(|id| !state.students.contains_key(id))
        {
            return Err(StoreError::NotFound("student"));
        }
        state.guardians.insert(guardian.id, guardian.clone());
        Ok(())
    }

    async fn get_guardian(&self, id: GuardianId) -> Result<Option<Guardian>, StoreError> {
        Ok(self.read()?.guardians.get(&id).cloned())
    }

    async fn list_guardians(&self) -> Result<Vec<Guardian>, StoreError> {
        let mut guardians: Vec<_> = self.read()?.guardians.values().cloned().collect();
        guardians.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(guardians)
    }

    async fn find_guardians_by_name(&self, name: &str) -> Result<Vec<Guardian>, StoreError> {
        Ok(self
            .read()?
            .guardians
            .values()
            .filter(|g| same_name(&g.name, name))
            .cloned()
            .collect())
    }

    async fn link_guardian_student(
        &self,
        guardian_id: GuardianId,
        student_id: StudentId,
    ) -> Result<Guardian, StoreError> {
        let mut state = self.write()?;
        if !state.students.contains_key(&student_id) {
            return Err(StoreError::NotFound("student"));
        }
        let guardian = state
            .guardians
            .get_mut(&guardian_id)
            .ok_or(StoreError::NotFound("guardian"))?;
        guardian.link(student_id);
        Ok(guardian.clone())
    }

    async fn insert_discount(&self, discount: &Discount) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.students.contains_key(&discount.student_id) {
            return Err(StoreError::NotFound("student"));
        }
        state.discounts.insert(discount.id, discount.clone());
        Ok(())
    }

    async fn list_discounts(
        &self,
        student_id: Option<StudentId>,
    ) -> Result<Vec<Discount>, StoreError> {
        let mut discounts: Vec<_> = self
            .read()?
            .discounts
            .values()
            .filter(|d| student_id.is_none_or(|s| d.student_id == s))
            .cloned()
            .collect();
        discounts.sort_by_key(|d| d.created_at);
        Ok(discounts)
    }

    async fn generate_invoices(
        &self,
        cmd: &GenerateInvoices,
        class: &ClassCohort,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let mut state = self.write()?;

        let student_ids: Vec<StudentId> = state
            .memberships
            .iter()
            .filter(|m| m.active && m.class_id == class.id)
            .map(|m| m.student_id)
            .collect();
        let discounts: Vec<Discount> = state
            .discounts
            .values()
            .filter(|d| student_ids.contains(&d.student_id))
            .cloned()
            .collect();
        let existing: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.key.class_id == class.id && i.key.period == cmd.period)
            .cloned()
            .collect();

        let batch = plan_invoice_batch(cmd, class, &student_ids, &discounts, &existing, now);
        Ok(batch
            .into_iter()
            .map(|invoice| state.upsert_invoice(invoice))
            .collect())
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.read()?.invoices.get(&id).cloned())
    }

    async fn list_invoices(&self, filter: InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices: Vec<_> = self
            .read()?
            .invoices
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        sort_newest_due_first(&mut invoices);
        Ok(invoices)
    }

    async fn decide_invoice(
        &self,
        id: InvoiceId,
        decision: ApprovalDecision,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError> {
        let mut state = self.write()?;
        let invoice = state
            .invoices
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("invoice"))?;
        let memberships: Vec<ClassMembership> = state
            .memberships
            .iter()
            .filter(|m| m.student_id == invoice.student_id())
            .cloned()
            .collect();

        let outcome = decide(&invoice, decision, &memberships, now);

        state.invoices.insert(id, outcome.invoice.clone());
        if let Some(m) = outcome.enrollment.membership() {
            state.upsert_membership(m.clone());
        }
        Ok(outcome)
    }

    async fn record_payment(
        &self,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> Result<Invoice, StoreError> {
        let mut state = self.write()?;
        let mut invoice = state
            .invoices
            .get(&payment.invoice_id)
            .cloned()
            .ok_or(StoreError::NotFound("invoice"))?;

        // Validate the running total before anything is written.
        let total = total_paid(
            state
                .payments
                .iter()
                .filter(|p| p.invoice_id == invoice.id)
                .chain(std::iter::once(payment)),
        )?;

        state.payments.push(payment.clone());
        settle(&mut invoice, total, now);
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn payments_for_invoices(&self, ids: &[InvoiceId]) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<_> = self
            .read()?
            .payments
            .iter()
            .filter(|p| ids.contains(&p.invoice_id))
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.paid_on, p.created_at));
        Ok(payments)
    }

    async fn insert_cash_entry(&self, entry: &CashEntry) -> Result<(), StoreError> {
        self.write()?.cash_entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get_cash_entry(&self, id: CashEntryId) -> Result<Option<CashEntry>, StoreError> {
        Ok(self.read()?.cash_entries.get(&id).cloned())
    }

    async fn update_cash_entry(&self, entry: &CashEntry) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let slot = state
            .cash_entries
            .get_mut(&entry.id)
            .ok_or(StoreError::NotFound("cash entry"))?;
        *slot = entry.clone();
        Ok(())
    }

    async fn delete_cash_entry(&self, id: CashEntryId) -> Result<CashEntry, StoreError> {
        self.write()?
            .cash_entries
            .remove(&id)
            .ok_or(StoreError::NotFound("cash entry"))
    }

    async fn list_cash_entries(
        &self,
        filter: CashEntryFilter,
    ) -> Result<Vec<CashEntry>, StoreError> {
        let mut entries: Vec<_> = self
            .read()?
            .cash_entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        sort_latest_entry_first(&mut entries);
        Ok(entries)
    }
}
