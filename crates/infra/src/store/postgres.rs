//! Postgres-backed billing store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Conflict` |
//! | Database (raised exception) | `P0001` | `Backend` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |
//!
//! Every multi-row operation runs in one transaction and locks the rows it
//! rewrites (`FOR UPDATE`), so concurrent decisions or payments on the same
//! invoice serialize.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use classbook_billing::{
    decide, plan_invoice_batch, settle, total_paid, ApprovalDecision, ApprovalOutcome, CashEntry,
    CashEntryFilter, ClassCohort, ClassMembership, Discount, FinancialPlan, GenerateInvoices,
    Guardian, Invoice, InvoiceKey, Payment, Period, Student, TuitionAmounts,
};
use classbook_core::{
    CashEntryId, ClassId, DiscountId, GuardianId, InvoiceId, MembershipId, Money, PaymentId,
    StudentId,
};

use super::{BillingStore, InvoiceFilter, StoreError};

const INVOICE_COLUMNS: &str = "id, period, student_id, class_id, gross, discount, net, due_date, \
     payment_status, approval_status, created_at, updated_at";

const STUDENT_COLUMNS: &str = "id, name, phone, access_code, status, created_at";

const CLASS_COLUMNS: &str = "id, name, enrollment_fee, monthly_tuition, created_at";

const MEMBERSHIP_COLUMNS: &str = "id, student_id, class_id, started_at, ended_at, active";

const DISCOUNT_COLUMNS: &str = "id, student_id, kind, percentage, fixed_amount, created_at";

const PAYMENT_COLUMNS: &str = "id, invoice_id, paid_on, amount, method, notes, created_at";

const GUARDIAN_COLUMNS: &str = "id, name, phone, created_at";

const CASH_ENTRY_COLUMNS: &str =
    "id, kind, category, description, amount, occurred_on, notes, created_at, updated_at";

/// Postgres-backed billing store.
///
/// Uses an SQLx connection pool (thread-safe). Schema lives in
/// `migrations/`.
#[derive(Debug, Clone)]
pub struct PostgresBillingStore {
    pool: Arc<PgPool>,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    #[instrument(skip(self, class), fields(class_id = %class.id), err)]
    async fn insert_class(&self, class: &ClassCohort) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO classes (id, name, enrollment_fee, monthly_tuition, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(class.id.as_uuid())
        .bind(&class.name)
        .bind(class.plan.map(|p| p.enrollment_fee.cents()))
        .bind(class.plan.map(|p| p.monthly_tuition.cents()))
        .bind(class.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_class", e))?;
        Ok(())
    }

    async fn get_class(&self, id: ClassId) -> Result<Option<ClassCohort>, StoreError> {
        let sql = format!("SELECT {CLASS_COLUMNS} FROM classes WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_class", e))?;
        row.as_ref().map(class_from_row).transpose()
    }

    async fn list_classes(&self) -> Result<Vec<ClassCohort>, StoreError> {
        let sql = format!("SELECT {CLASS_COLUMNS} FROM classes ORDER BY name ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_classes", e))?;
        rows.iter().map(class_from_row).collect()
    }

    async fn access_codes(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT access_code FROM students")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("access_codes", e))?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("access_code").map_err(decode_error))
            .collect()
    }

    #[instrument(skip(self, student, memberships), fields(student_id = %student.id), err)]
    async fn insert_student(
        &self,
        student: &Student,
        memberships: &[ClassMembership],
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let class_ids: Vec<Uuid> = memberships.iter().map(|m| *m.class_id.as_uuid()).collect();
        if !class_ids.is_empty() {
            let known: i64 = sqlx::query("SELECT COUNT(*) AS n FROM classes WHERE id = ANY($1)")
                .bind(&class_ids)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_classes", e))?
                .try_get("n")
                .map_err(decode_error)?;
            let mut distinct = class_ids.clone();
            distinct.sort();
            distinct.dedup();
            if known != distinct.len() as i64 {
                return Err(StoreError::NotFound("class"));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO students (id, name, phone, access_code, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(student.id.as_uuid())
        .bind(&student.name)
        .bind(&student.phone)
        .bind(&student.access_code)
        .bind(student.status.as_str())
        .bind(student.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_student", e))?;

        for m in memberships {
            upsert_membership(&mut tx, m).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn get_student(&self, id: StudentId) -> Result<Option<Student>, StoreError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_student", e))?;
        row.as_ref().map(student_from_row).transpose()
    }

    async fn find_student_by_access_code(&self, code: &str) -> Result<Option<Student>, StoreError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE access_code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_student_by_access_code", e))?;
        row.as_ref().map(student_from_row).transpose()
    }

    async fn list_students(&self, include_inactive: bool) -> Result<Vec<Student>, StoreError> {
        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE $1 OR status = 'active' ORDER BY name ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(include_inactive)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_students", e))?;
        rows.iter().map(student_from_row).collect()
    }

    async fn memberships_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<ClassMembership>, StoreError> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM class_memberships WHERE student_id = $1 ORDER BY started_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("memberships_for_student", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn active_memberships(&self) -> Result<Vec<ClassMembership>, StoreError> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM class_memberships WHERE active");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_memberships", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    #[instrument(skip(self, guardian), fields(guardian_id = %guardian.id), err)]
    async fn insert_guardian(&self, guardian: &Guardian) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO guardians (id, name, phone, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(guardian.id.as_uuid())
        .bind(&guardian.name)
        .bind(&guardian.phone)
        .bind(guardian.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_guardian", e))?;

        for student_id in &guardian.student_ids {
            insert_guardian_link(&mut tx, guardian.id, *student_id, guardian.created_at).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn get_guardian(&self, id: GuardianId) -> Result<Option<Guardian>, StoreError> {
        let sql = format!("SELECT {GUARDIAN_COLUMNS} FROM guardians WHERE id = $1");
        let rows = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_guardian", e))?;
        Ok(self.with_links(&rows).await?.pop())
    }

    async fn list_guardians(&self) -> Result<Vec<Guardian>, StoreError> {
        let sql = format!("SELECT {GUARDIAN_COLUMNS} FROM guardians ORDER BY name ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_guardians", e))?;
        self.with_links(&rows).await
    }

    async fn find_guardians_by_name(&self, name: &str) -> Result<Vec<Guardian>, StoreError> {
        let sql = format!(
            "SELECT {GUARDIAN_COLUMNS} FROM guardians WHERE lower(name) = lower($1) ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(name.trim())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_guardians_by_name", e))?;
        self.with_links(&rows).await
    }

    #[instrument(skip(self), err)]
    async fn link_guardian_student(
        &self,
        guardian_id: GuardianId,
        student_id: StudentId,
    ) -> Result<Guardian, StoreError> {
        let mut tx = self.begin().await?;

        let sql = format!("SELECT {GUARDIAN_COLUMNS} FROM guardians WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(guardian_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_guardian", e))?
            .ok_or(StoreError::NotFound("guardian"))?;
        let mut guardian = guardian_from_row(&row)?;

        let exists = sqlx::query("SELECT 1 FROM students WHERE id = $1")
            .bind(student_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_student", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound("student"));
        }

        insert_guardian_link(&mut tx, guardian_id, student_id, Utc::now()).await?;
        guardian.student_ids = guardian_links(&mut tx, &[guardian_id])
            .await?
            .into_iter()
            .map(|(_, s)| s)
            .collect();

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(guardian)
    }

    #[instrument(skip(self, discount), fields(student_id = %discount.student_id), err)]
    async fn insert_discount(&self, discount: &Discount) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM students WHERE id = $1")
            .bind(discount.student_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_student", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound("student"));
        }

        sqlx::query(
            r#"
            INSERT INTO discounts (id, student_id, kind, percentage, fixed_amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(discount.id.as_uuid())
        .bind(discount.student_id.as_uuid())
        .bind(&discount.kind)
        .bind(discount.percentage.map(|p| p as i32))
        .bind(discount.fixed_amount.map(Money::cents))
        .bind(discount.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_discount", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn list_discounts(
        &self,
        student_id: Option<StudentId>,
    ) -> Result<Vec<Discount>, StoreError> {
        let sql = format!(
            "SELECT {DISCOUNT_COLUMNS} FROM discounts \
             WHERE ($1::uuid IS NULL OR student_id = $1) ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.map(|s| *s.as_uuid()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_discounts", e))?;
        rows.iter().map(discount_from_row).collect()
    }

    #[instrument(
        skip(self, cmd, class, now),
        fields(
            class_id = %class.id,
            period = %cmd.period,
            operation = "generate_invoices",
            invoice_count = tracing::field::Empty,
        ),
        err
    )]
    async fn generate_invoices(
        &self,
        cmd: &GenerateInvoices,
        class: &ClassCohort,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let mut tx = self.begin().await?;

        let student_ids: Vec<StudentId> = sqlx::query(
            "SELECT student_id FROM class_memberships WHERE class_id = $1 AND active",
        )
        .bind(class.id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("active_students", e))?
        .iter()
        .map(|r| r.try_get::<Uuid, _>("student_id").map(StudentId::from_uuid))
        .collect::<Result<_, _>>()
        .map_err(decode_error)?;

        // One batched read for every enrolled student's discounts.
        let raw_ids: Vec<Uuid> = student_ids.iter().map(|s| *s.as_uuid()).collect();
        let sql = format!("SELECT {DISCOUNT_COLUMNS} FROM discounts WHERE student_id = ANY($1)");
        let discounts = sqlx::query(&sql)
            .bind(&raw_ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("batch_discounts", e))?
            .iter()
            .map(discount_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE class_id = $1 AND period = $2 FOR UPDATE"
        );
        let existing = sqlx::query(&sql)
            .bind(class.id.as_uuid())
            .bind(cmd.period.to_string())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("existing_invoices", e))?
            .iter()
            .map(invoice_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let batch = plan_invoice_batch(cmd, class, &student_ids, &discounts, &existing, now);

        let upsert = format!(
            r#"
            INSERT INTO invoices (
                id, period, student_id, class_id, gross, discount, net, due_date,
                payment_status, approval_status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (period, student_id, class_id)
            DO UPDATE SET
                gross = EXCLUDED.gross,
                discount = EXCLUDED.discount,
                net = EXCLUDED.net,
                due_date = EXCLUDED.due_date,
                updated_at = EXCLUDED.updated_at
            RETURNING {INVOICE_COLUMNS}
            "#
        );

        let mut stored = Vec::with_capacity(batch.len());
        for invoice in &batch {
            let row = sqlx::query(&upsert)
                .bind(invoice.id.as_uuid())
                .bind(invoice.key.period.to_string())
                .bind(invoice.student_id().as_uuid())
                .bind(invoice.class_id().as_uuid())
                .bind(invoice.amounts.gross.cents())
                .bind(invoice.amounts.discount.cents())
                .bind(invoice.amounts.net.cents())
                .bind(invoice.due_date)
                .bind(invoice.payment_status.as_str())
                .bind(invoice.approval_status.as_str())
                .bind(invoice.created_at)
                .bind(invoice.updated_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("upsert_invoice", e))?;
            stored.push(invoice_from_row(&row)?);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("invoice_count", stored.len());
        Ok(stored)
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_invoice", e))?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn list_invoices(&self, filter: InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE ($1::uuid IS NULL OR student_id = $1) \
               AND ($2::uuid IS NULL OR class_id = $2) \
             ORDER BY due_date DESC, created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.student_id.map(|s| *s.as_uuid()))
            .bind(filter.class_id.map(|c| *c.as_uuid()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_invoices", e))?;
        rows.iter().map(invoice_from_row).collect()
    }

    #[instrument(skip(self, now), fields(invoice_id = %id, decision = ?decision), err)]
    async fn decide_invoice(
        &self,
        id: InvoiceId,
        decision: ApprovalDecision,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError> {
        let mut tx = self.begin().await?;

        let invoice = lock_invoice(&mut tx, id).await?;

        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM class_memberships WHERE student_id = $1 FOR UPDATE"
        );
        let memberships = sqlx::query(&sql)
            .bind(invoice.student_id().as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_memberships", e))?
            .iter()
            .map(membership_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let outcome = decide(&invoice, decision, &memberships, now);

        sqlx::query("UPDATE invoices SET approval_status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(outcome.invoice.approval_status.as_str())
            .bind(outcome.invoice.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_approval", e))?;

        if let Some(m) = outcome.enrollment.membership() {
            upsert_membership(&mut tx, m).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(outcome)
    }

    #[instrument(skip(self, payment, now), fields(invoice_id = %payment.invoice_id), err)]
    async fn record_payment(
        &self,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> Result<Invoice, StoreError> {
        let mut tx = self.begin().await?;

        let mut invoice = lock_invoice(&mut tx, payment.invoice_id).await?;

        // Validate the running total before anything is written.
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE invoice_id = $1");
        let existing = sqlx::query(&sql)
            .bind(payment.invoice_id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("existing_payments", e))?
            .iter()
            .map(payment_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let total = total_paid(existing.iter().chain(std::iter::once(payment)))?;

        sqlx::query(
            r#"
            INSERT INTO payments (id, invoice_id, paid_on, amount, method, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.invoice_id.as_uuid())
        .bind(payment.paid_on)
        .bind(payment.amount.cents())
        .bind(payment.method.as_str())
        .bind(payment.notes.as_deref())
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_payment", e))?;

        settle(&mut invoice, total, now);

        sqlx::query("UPDATE invoices SET payment_status = $2, updated_at = $3 WHERE id = $1")
            .bind(invoice.id.as_uuid())
            .bind(invoice.payment_status.as_str())
            .bind(invoice.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_payment_status", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(invoice)
    }

    async fn payments_for_invoices(&self, ids: &[InvoiceId]) -> Result<Vec<Payment>, StoreError> {
        let raw: Vec<Uuid> = ids.iter().map(|i| *i.as_uuid()).collect();
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE invoice_id = ANY($1) \
             ORDER BY paid_on ASC, created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(&raw)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("payments_for_invoices", e))?;
        rows.iter().map(payment_from_row).collect()
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id), err)]
    async fn insert_cash_entry(&self, entry: &CashEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cash_entries (
                id, kind, category, description, amount, occurred_on, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(entry.category.as_str())
        .bind(&entry.description)
        .bind(entry.amount.cents())
        .bind(entry.occurred_on)
        .bind(entry.notes.as_deref())
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_cash_entry", e))?;
        Ok(())
    }

    async fn get_cash_entry(&self, id: CashEntryId) -> Result<Option<CashEntry>, StoreError> {
        let sql = format!("SELECT {CASH_ENTRY_COLUMNS} FROM cash_entries WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_cash_entry", e))?;
        row.as_ref().map(cash_entry_from_row).transpose()
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id), err)]
    async fn update_cash_entry(&self, entry: &CashEntry) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cash_entries
            SET kind = $2, category = $3, description = $4, amount = $5,
                occurred_on = $6, notes = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(entry.category.as_str())
        .bind(&entry.description)
        .bind(entry.amount.cents())
        .bind(entry.occurred_on)
        .bind(entry.notes.as_deref())
        .bind(entry.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_cash_entry", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("cash entry"));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_cash_entry(&self, id: CashEntryId) -> Result<CashEntry, StoreError> {
        let sql = format!("DELETE FROM cash_entries WHERE id = $1 RETURNING {CASH_ENTRY_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_cash_entry", e))?
            .ok_or(StoreError::NotFound("cash entry"))?;
        cash_entry_from_row(&row)
    }

    async fn list_cash_entries(
        &self,
        filter: CashEntryFilter,
    ) -> Result<Vec<CashEntry>, StoreError> {
        let sql = format!(
            "SELECT {CASH_ENTRY_COLUMNS} FROM cash_entries \
             WHERE ($1::date IS NULL OR occurred_on BETWEEN $1 AND $2) \
               AND ($3::text IS NULL OR kind = $3) \
               AND ($4::text IS NULL OR category = $4) \
             ORDER BY occurred_on DESC, created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.period.map(|p| p.first_day()))
            .bind(filter.period.map(|p| p.last_day()))
            .bind(filter.kind.map(|k| k.as_str()))
            .bind(filter.category.map(|c| c.as_str()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_cash_entries", e))?;
        rows.iter().map(cash_entry_from_row).collect()
    }
}

impl PostgresBillingStore {
    /// Attach student links to guardian rows with one batched read.
    async fn with_links(&self, rows: &[PgRow]) -> Result<Vec<Guardian>, StoreError> {
        let mut guardians = rows
            .iter()
            .map(guardian_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        if guardians.is_empty() {
            return Ok(guardians);
        }

        let ids: Vec<GuardianId> = guardians.iter().map(|g| g.id).collect();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire_connection", e))?;
        for (guardian_id, student_id) in guardian_links(&mut conn, &ids).await? {
            if let Some(g) = guardians.iter_mut().find(|g| g.id == guardian_id) {
                g.student_ids.push(student_id);
            }
        }
        Ok(guardians)
    }
}

async fn guardian_links(
    conn: &mut PgConnection,
    ids: &[GuardianId],
) -> Result<Vec<(GuardianId, StudentId)>, StoreError> {
    let raw: Vec<Uuid> = ids.iter().map(|i| *i.as_uuid()).collect();
    let rows = sqlx::query(
        "SELECT guardian_id, student_id FROM guardian_students \
         WHERE guardian_id = ANY($1) ORDER BY linked_at ASC, student_id ASC",
    )
    .bind(&raw)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("guardian_links", e))?;

    rows.iter()
        .map(|r| {
            Ok((
                GuardianId::from_uuid(r.try_get("guardian_id")?),
                StudentId::from_uuid(r.try_get("student_id")?),
            ))
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(decode_error)
}

/// Insert one guardian link, ignoring an existing one. An unknown student
/// surfaces as `NotFound("student")` rather than a foreign-key conflict.
async fn insert_guardian_link(
    conn: &mut PgConnection,
    guardian_id: GuardianId,
    student_id: StudentId,
    linked_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO guardian_students (guardian_id, student_id, linked_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (guardian_id, student_id) DO NOTHING
        "#,
    )
    .bind(guardian_id.as_uuid())
    .bind(student_id.as_uuid())
    .bind(linked_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
            StoreError::NotFound("student")
        }
        other => map_sqlx_error("insert_guardian_link", other),
    })?;
    Ok(())
}

async fn lock_invoice(conn: &mut PgConnection, id: InvoiceId) -> Result<Invoice, StoreError> {
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_invoice", e))?
        .ok_or(StoreError::NotFound("invoice"))?;
    invoice_from_row(&row)
}

async fn upsert_membership(
    conn: &mut PgConnection,
    membership: &ClassMembership,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO class_memberships (id, student_id, class_id, started_at, ended_at, active)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id)
        DO UPDATE SET
            ended_at = EXCLUDED.ended_at,
            active = EXCLUDED.active
        "#,
    )
    .bind(membership.id.as_uuid())
    .bind(membership.student_id.as_uuid())
    .bind(membership.class_id.as_uuid())
    .bind(membership.started_at)
    .bind(membership.ended_at)
    .bind(membership.active)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("upsert_membership", e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

fn corrupt(field: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Backend(format!("invalid {field} in stored row: {err}"))
}

fn class_from_row(row: &PgRow) -> Result<ClassCohort, StoreError> {
    let fee: Option<i64> = row.try_get("enrollment_fee").map_err(decode_error)?;
    let tuition: Option<i64> = row.try_get("monthly_tuition").map_err(decode_error)?;
    let plan = match (fee, tuition) {
        (None, None) => None,
        (fee, tuition) => Some(FinancialPlan {
            enrollment_fee: Money::from_cents(fee.unwrap_or(0)),
            monthly_tuition: Money::from_cents(tuition.unwrap_or(0)),
        }),
    };
    Ok(ClassCohort {
        id: ClassId::from_uuid(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        plan,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn student_from_row(row: &PgRow) -> Result<Student, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    Ok(Student {
        id: StudentId::from_uuid(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        phone: row.try_get("phone").map_err(decode_error)?,
        access_code: row.try_get("access_code").map_err(decode_error)?,
        status: status.parse().map_err(|e| corrupt("status", e))?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<ClassMembership, StoreError> {
    Ok(ClassMembership {
        id: MembershipId::from_uuid(row.try_get("id").map_err(decode_error)?),
        student_id: StudentId::from_uuid(row.try_get("student_id").map_err(decode_error)?),
        class_id: ClassId::from_uuid(row.try_get("class_id").map_err(decode_error)?),
        started_at: row.try_get("started_at").map_err(decode_error)?,
        ended_at: row.try_get("ended_at").map_err(decode_error)?,
        active: row.try_get("active").map_err(decode_error)?,
    })
}

fn discount_from_row(row: &PgRow) -> Result<Discount, StoreError> {
    let percentage: Option<i32> = row.try_get("percentage").map_err(decode_error)?;
    let fixed: Option<i64> = row.try_get("fixed_amount").map_err(decode_error)?;
    Ok(Discount {
        id: DiscountId::from_uuid(row.try_get("id").map_err(decode_error)?),
        student_id: StudentId::from_uuid(row.try_get("student_id").map_err(decode_error)?),
        kind: row.try_get("kind").map_err(decode_error)?,
        percentage: percentage
            .map(u32::try_from)
            .transpose()
            .map_err(|e| corrupt("percentage", e))?,
        fixed_amount: fixed.map(Money::from_cents),
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn invoice_from_row(row: &PgRow) -> Result<Invoice, StoreError> {
    let period: String = row.try_get("period").map_err(decode_error)?;
    let period: Period = period.parse().map_err(|e| corrupt("period", e))?;
    let payment_status: String = row.try_get("payment_status").map_err(decode_error)?;
    let approval_status: String = row.try_get("approval_status").map_err(decode_error)?;

    Ok(Invoice {
        id: InvoiceId::from_uuid(row.try_get("id").map_err(decode_error)?),
        key: InvoiceKey::new(
            period,
            StudentId::from_uuid(row.try_get("student_id").map_err(decode_error)?),
            ClassId::from_uuid(row.try_get("class_id").map_err(decode_error)?),
        ),
        amounts: TuitionAmounts {
            gross: Money::from_cents(row.try_get("gross").map_err(decode_error)?),
            discount: Money::from_cents(row.try_get("discount").map_err(decode_error)?),
            net: Money::from_cents(row.try_get("net").map_err(decode_error)?),
        },
        due_date: row.try_get("due_date").map_err(decode_error)?,
        payment_status: payment_status
            .parse()
            .map_err(|e| corrupt("payment_status", e))?,
        approval_status: approval_status
            .parse()
            .map_err(|e| corrupt("approval_status", e))?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn guardian_from_row(row: &PgRow) -> Result<Guardian, StoreError> {
    Ok(Guardian {
        id: GuardianId::from_uuid(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        phone: row.try_get("phone").map_err(decode_error)?,
        student_ids: Vec::new(),
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn cash_entry_from_row(row: &PgRow) -> Result<CashEntry, StoreError> {
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let category: String = row.try_get("category").map_err(decode_error)?;
    Ok(CashEntry {
        id: CashEntryId::from_uuid(row.try_get("id").map_err(decode_error)?),
        kind: kind.parse().map_err(|e| corrupt("kind", e))?,
        category: category.parse().map_err(|e| corrupt("category", e))?,
        description: row.try_get("description").map_err(decode_error)?,
        amount: Money::from_cents(row.try_get("amount").map_err(decode_error)?),
        occurred_on: row.try_get("occurred_on").map_err(decode_error)?,
        notes: row.try_get("notes").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let method: String = row.try_get("method").map_err(decode_error)?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id").map_err(decode_error)?),
        invoice_id: InvoiceId::from_uuid(row.try_get("invoice_id").map_err(decode_error)?),
        paid_on: row.try_get("paid_on").map_err(decode_error)?,
        amount: Money::from_cents(row.try_get("amount").map_err(decode_error)?),
        method: method.parse().map_err(|e| corrupt("method", e))?,
        notes: row.try_get("notes").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

/// Map SQLx errors to `StoreError`, naming the failing operation.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
