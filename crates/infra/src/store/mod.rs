//! Billing storage boundary.
//!
//! The store owns every multi-row unit of work (generation batch, approval
//! decision, payment settlement, guardian links) so that each one is atomic:
//! the in-memory adapter holds a single write lock for the whole unit, the
//! Postgres adapter runs it inside one transaction. Planning itself stays in `classbook-billing`.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use classbook_billing::{
    ApprovalDecision, ApprovalOutcome, CashEntry, CashEntryFilter, ClassCohort, ClassMembership,
    Discount, GenerateInvoices, Guardian, Invoice, Payment, Student,
};
use classbook_core::{CashEntryId, ClassId, DomainError, GuardianId, InvoiceId, StudentId};

pub use in_memory::InMemoryBillingStore;
pub use postgres::PostgresBillingStore;

/// Storage operation error.
///
/// Mostly infrastructure errors. Lookups that miss on a required row surface
/// as `NotFound`; a domain rule that can only be checked against stored rows
/// (e.g. the running payment total) surfaces as `Domain`, with nothing
/// written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Optional filters for invoice listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub student_id: Option<StudentId>,
    pub class_id: Option<ClassId>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        self.student_id.is_none_or(|s| invoice.student_id() == s)
            && self.class_id.is_none_or(|c| invoice.class_id() == c)
    }
}

/// Persistent store for the registry and billing records.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // ── registry ──────────────────────────────────────────────────────────

    async fn insert_class(&self, class: &ClassCohort) -> Result<(), StoreError>;

    async fn get_class(&self, id: ClassId) -> Result<Option<ClassCohort>, StoreError>;

    async fn list_classes(&self) -> Result<Vec<ClassCohort>, StoreError>;

    /// All access codes in use, for computing the next one.
    async fn access_codes(&self) -> Result<Vec<String>, StoreError>;

    /// Insert a student together with their initial memberships.
    ///
    /// Fails with `Conflict` if the access code is taken and with
    /// `NotFound("class")` if a membership references an unknown class.
    async fn insert_student(
        &self,
        student: &Student,
        memberships: &[ClassMembership],
    ) -> Result<(), StoreError>;

    async fn get_student(&self, id: StudentId) -> Result<Option<Student>, StoreError>;

    /// Lookup by normalized (uppercase) access code.
    async fn find_student_by_access_code(&self, code: &str) -> Result<Option<Student>, StoreError>;

    async fn list_students(&self, include_inactive: bool) -> Result<Vec<Student>, StoreError>;

    async fn memberships_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<ClassMembership>, StoreError>;

    /// Every active membership across all classes.
    async fn active_memberships(&self) -> Result<Vec<ClassMembership>, StoreError>;

    // ── guardians ─────────────────────────────────────────────────────────

    /// Insert a guardian with its student links.
    ///
    /// Fails with `NotFound("student")` if a link references an unknown
    /// student.
    async fn insert_guardian(&self, guardian: &Guardian) -> Result<(), StoreError>;

    async fn get_guardian(&self, id: GuardianId) -> Result<Option<Guardian>, StoreError>;

    async fn list_guardians(&self) -> Result<Vec<Guardian>, StoreError>;

    /// Guardians whose name matches case-insensitively.
    async fn find_guardians_by_name(&self, name: &str) -> Result<Vec<Guardian>, StoreError>;

    /// Link a student to a guardian (no-op when already linked) and return
    /// the updated guardian.
    async fn link_guardian_student(
        &self,
        guardian_id: GuardianId,
        student_id: StudentId,
    ) -> Result<Guardian, StoreError>;

    // ── discounts ─────────────────────────────────────────────────────────

    async fn insert_discount(&self, discount: &Discount) -> Result<(), StoreError>;

    async fn list_discounts(&self, student_id: Option<StudentId>)
    -> Result<Vec<Discount>, StoreError>;

    // ── invoices ──────────────────────────────────────────────────────────

    /// Generate (upsert) one invoice per actively enrolled student of the
    /// class, as a single atomic unit. Returns the stored invoices.
    async fn generate_invoices(
        &self,
        cmd: &GenerateInvoices,
        class: &ClassCohort,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, StoreError>;

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    /// Invoices matching `filter`, newest due date first.
    async fn list_invoices(&self, filter: InvoiceFilter) -> Result<Vec<Invoice>, StoreError>;

    /// Apply an approval decision and its membership change atomically.
    async fn decide_invoice(
        &self,
        id: InvoiceId,
        decision: ApprovalDecision,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError>;

    // ── payments ──────────────────────────────────────────────────────────

    /// Insert a payment and settle its invoice atomically.
    /// Returns the invoice after settlement.
    async fn record_payment(
        &self,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> Result<Invoice, StoreError>;

    async fn payments_for_invoices(&self, ids: &[InvoiceId]) -> Result<Vec<Payment>, StoreError>;

    // ── cash book ─────────────────────────────────────────────────────────

    async fn insert_cash_entry(&self, entry: &CashEntry) -> Result<(), StoreError>;

    async fn get_cash_entry(&self, id: CashEntryId) -> Result<Option<CashEntry>, StoreError>;

    /// Overwrite a stored entry. Fails with `NotFound` if it is gone.
    async fn update_cash_entry(&self, entry: &CashEntry) -> Result<(), StoreError>;

    /// Remove an entry, returning what was removed.
    async fn delete_cash_entry(&self, id: CashEntryId) -> Result<CashEntry, StoreError>;

    /// Entries matching `filter`, latest date first.
    async fn list_cash_entries(&self, filter: CashEntryFilter)
    -> Result<Vec<CashEntry>, StoreError>;
}

/// Order cash entries latest date first, breaking ties by creation time.
pub(crate) fn sort_latest_entry_first(entries: &mut [CashEntry]) {
    entries.sort_by(|a, b| {
        b.occurred_on
            .cmp(&a.occurred_on)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Order invoices newest due date first, breaking ties by creation time.
pub(crate) fn sort_newest_due_first(invoices: &mut [Invoice]) {
    invoices.sort_by(|a, b| {
        b.due_date
            .cmp(&a.due_date)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}
