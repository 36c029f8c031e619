use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use classbook_billing::{
    total_paid, ApprovalDecision, ApprovalOutcome, GenerateInvoices, Invoice, Payment,
    RecordPayment,
};
use classbook_core::{InvoiceId, Money};

use super::{record_audit, ServiceResult};
use crate::audit::{actions, Actor, AuditEntry, AuditSink};
use crate::store::{BillingStore, InvoiceFilter, StoreError};

/// An invoice together with its payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub payments: Vec<Payment>,
    pub total_paid: Money,
}

/// Invoice generation, approval decisions and payment recording.
#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn BillingStore>,
    audit: Arc<dyn AuditSink>,
}

impl BillingService {
    pub fn new(store: Arc<dyn BillingStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Generate the period's tuition invoices for one class.
    ///
    /// Safe to repeat: existing invoices for the same (period, student, class)
    /// are refreshed rather than duplicated.
    #[instrument(skip(self, cmd, now), fields(class_id = %cmd.class_id, period = %cmd.period), err)]
    pub async fn generate_invoices(
        &self,
        actor: &Actor,
        cmd: GenerateInvoices,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Invoice>> {
        let class = self
            .store
            .get_class(cmd.class_id)
            .await?
            .ok_or(StoreError::NotFound("class"))?;

        let invoices = self.store.generate_invoices(&cmd, &class, now).await?;

        let summary = serde_json::json!({
            "class_id": class.id,
            "period": cmd.period,
            "gross": cmd.gross_for(&class),
            "count": invoices.len(),
        });
        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(
                actor,
                actions::GENERATE_INVOICES,
                "invoice",
                Some(format!("{}:{}", class.id, cmd.period)),
                now,
            )
            .with_snapshots(None::<&()>, Some(&summary)),
        )
        .await;
        info!(count = invoices.len(), "invoices generated");
        Ok(invoices)
    }

    /// Invoices matching `filter` with their payments, newest due first.
    pub async fn list_invoices(&self, filter: InvoiceFilter) -> ServiceResult<Vec<InvoiceView>> {
        let invoices = self.store.list_invoices(filter).await?;
        self.with_payments(invoices).await
    }

    pub(crate) async fn with_payments(
        &self,
        invoices: Vec<Invoice>,
    ) -> ServiceResult<Vec<InvoiceView>> {
        attach_payments(self.store.as_ref(), invoices).await
    }

    /// Approve or reject an invoice, adjusting the student's enrollment in
    /// the invoice's class in the same unit of work.
    #[instrument(skip(self, now), err)]
    pub async fn decide_invoice(
        &self,
        actor: &Actor,
        id: InvoiceId,
        decision: ApprovalDecision,
        now: DateTime<Utc>,
    ) -> ServiceResult<ApprovalOutcome> {
        let outcome = self.store.decide_invoice(id, decision, now).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(actor, actions::DECIDE_INVOICE, "invoice", Some(id.to_string()), now)
                .with_snapshots(Some(&outcome.before), Some(&outcome.invoice)),
        )
        .await;
        info!(
            previous = outcome.previous_status.as_str(),
            current = outcome.invoice.approval_status.as_str(),
            enrollment = outcome.enrollment.label(),
            "invoice decided"
        );
        Ok(outcome)
    }

    /// Record a payment and settle the invoice.
    #[instrument(skip(self, input, now), err)]
    pub async fn record_payment(
        &self,
        actor: &Actor,
        input: RecordPayment,
        now: DateTime<Utc>,
    ) -> ServiceResult<(Payment, Invoice)> {
        let payment = input.into_payment(now)?;
        let invoice = self.store.record_payment(&payment, now).await?;

        record_audit(
            self.audit.as_ref(),
            AuditEntry::new(
                actor,
                actions::RECORD_PAYMENT,
                "payment",
                Some(payment.id.to_string()),
                now,
            )
            .with_snapshots(None::<&()>, Some(&payment)),
        )
        .await;
        info!(
            invoice_id = %invoice.id,
            amount = payment.amount.cents(),
            status = invoice.payment_status.as_str(),
            "payment recorded"
        );
        Ok((payment, invoice))
    }
}

/// Join invoices with their payments using one batched read.
pub(crate) async fn attach_payments(
    store: &dyn BillingStore,
    invoices: Vec<Invoice>,
) -> ServiceResult<Vec<InvoiceView>> {
    let ids: Vec<InvoiceId> = invoices.iter().map(|i| i.id).collect();
    let mut by_invoice: HashMap<InvoiceId, Vec<Payment>> = HashMap::new();
    for p in store.payments_for_invoices(&ids).await? {
        by_invoice.entry(p.invoice_id).or_default().push(p);
    }

    invoices
        .into_iter()
        .map(|invoice| -> ServiceResult<InvoiceView> {
            let payments = by_invoice.remove(&invoice.id).unwrap_or_default();
            let total_paid = total_paid(&payments)?;
            Ok(InvoiceView {
                invoice,
                payments,
                total_paid,
            })
        })
        .collect()
}
