//! Payments recorded against tuition invoices.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{DomainError, Entity, InvoiceId, Money, PaymentId};

use crate::invoice::{Invoice, PaymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Pix,
    Cash,
    Transfer,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "pix",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Card => "card",
        }
    }
}

impl core::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pix" => Ok(Self::Pix),
            "cash" => Ok(Self::Cash),
            "transfer" => Ok(Self::Transfer),
            "card" => Ok(Self::Card),
            other => Err(DomainError::validation(format!("unknown payment method '{other}'"))),
        }
    }
}

/// A payment against exactly one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub paid_on: NaiveDate,
    pub amount: Money,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: record a payment.
///
/// Fields are optional so that a missing field is reported as a validation
/// error rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordPayment {
    pub invoice_id: Option<InvoiceId>,
    pub paid_on: Option<NaiveDate>,
    pub amount: Option<i64>,
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordPayment {
    /// Validate and build the payment. Does not look up the invoice.
    pub fn into_payment(self, now: DateTime<Utc>) -> Result<Payment, DomainError> {
        let invoice_id = self
            .invoice_id
            .ok_or_else(|| DomainError::validation("invoice_id is required"))?;
        let paid_on = self
            .paid_on
            .ok_or_else(|| DomainError::validation("paid_on is required"))?;
        let amount = self
            .amount
            .ok_or_else(|| DomainError::validation("amount is required"))?;
        let amount = Money::positive(amount, "amount")?;
        let method = self
            .method
            .ok_or_else(|| DomainError::validation("method is required"))?;
        let notes = self
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(Payment {
            id: PaymentId::new(),
            invoice_id,
            paid_on,
            amount,
            method,
            notes,
            created_at: now,
        })
    }
}

/// Cumulative amount of `payments`.
///
/// Fails with an invariant violation when the total cannot be represented;
/// callers must check this before persisting another payment.
pub fn total_paid<'a, I>(payments: I) -> Result<Money, DomainError>
where
    I: IntoIterator<Item = &'a Payment>,
{
    Money::checked_sum(payments.into_iter().map(|p| p.amount))
        .ok_or_else(|| DomainError::invariant("total paid on invoice overflows"))
}

/// Update an invoice's payment status given the cumulative amount paid.
///
/// Paid once `total_paid >= net`; otherwise the current status is kept
/// (pending or overdue). Exempt invoices are never touched.
pub fn settle(invoice: &mut Invoice, total_paid: Money, now: DateTime<Utc>) -> PaymentStatus {
    if invoice.payment_status != PaymentStatus::Exempt && total_paid >= invoice.amounts.net {
        invoice.payment_status = PaymentStatus::Paid;
        invoice.updated_at = now;
    }
    invoice.payment_status
}
