use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use classbook_billing::{
    ApprovalOutcome, CashEntry, CashEntryFilter, CashEntryInput, CashSummary, ClassCohort,
    ClassMembership, Discount, Guardian, Invoice, Payment, Period, Student,
};
use classbook_core::DomainError;
use classbook_infra::audit::AuditEntry;
use classbook_infra::services::{GuardianSummary, InvoiceView, StudentSummary};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------
//
// Fields are optional so that missing ones come back as validation errors
// with the usual JSON error body.

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub admin_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StudentLoginRequest {
    pub access_code: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GuardianLoginRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClassRequest {
    pub name: Option<String>,
    pub enrollment_fee: Option<i64>,
    pub monthly_tuition: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterStudentRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub class_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListStudentsQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterGuardianRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub student_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinkStudentRequest {
    pub student_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDiscountRequest {
    pub student_id: Option<String>,
    pub kind: Option<String>,
    pub percentage: Option<u32>,
    pub fixed_amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListDiscountsQuery {
    pub student_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateInvoicesRequest {
    pub class_id: Option<String>,
    pub period: Option<String>,
    pub gross_override: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub student_id: Option<String>,
    pub class_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecideInvoiceRequest {
    pub decision: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub invoice_id: Option<String>,
    /// `YYYY-MM-DD`
    pub paid_on: Option<String>,
    pub amount: Option<i64>,
    pub method: Option<String>,
    pub notes: Option<String>,
}

/// Cash entry body for both create and update. Kind and category arrive as
/// strings so that an unknown value is a validation error.
#[derive(Debug, Deserialize)]
pub struct CashEntryRequest {
    pub kind: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub amount: Option<i64>,
    /// `YYYY-MM-DD`
    pub occurred_on: Option<String>,
    pub notes: Option<String>,
}

impl CashEntryRequest {
    pub fn into_input(self) -> Result<CashEntryInput, DomainError> {
        Ok(CashEntryInput {
            kind: non_blank(self.kind.as_deref()).map(str::parse).transpose()?,
            category: non_blank(self.category.as_deref()).map(str::parse).transpose()?,
            description: self.description,
            amount: self.amount,
            occurred_on: non_blank(self.occurred_on.as_deref())
                .map(|raw| parse_date(raw, "occurred_on"))
                .transpose()?,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CashBookQuery {
    /// `YYYY-MM`
    pub period: Option<String>,
    pub kind: Option<String>,
    pub category: Option<String>,
}

impl CashBookQuery {
    pub fn into_filter(self) -> Result<CashEntryFilter, DomainError> {
        Ok(CashEntryFilter {
            period: non_blank(self.period.as_deref())
                .map(str::parse::<Period>)
                .transpose()?,
            kind: non_blank(self.kind.as_deref()).map(str::parse).transpose()?,
            category: non_blank(self.category.as_deref()).map(str::parse).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Parsing helpers
// -------------------------

/// Unwrap a JSON body, turning extractor rejections into a 400 JSON error.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()))
}

/// Unwrap a query string, turning extractor rejections into a 400 JSON error.
pub fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, axum::response::Response> {
    query
        .map(|Query(v)| v)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", e.body_text()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, DomainError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DomainError::validation(format!("{field} is required")))
}

pub fn parse_id<T>(raw: &str) -> Result<T, DomainError>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.trim().parse()
}

pub fn parse_optional_id<T>(raw: Option<&str>) -> Result<Option<T>, DomainError>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(parse_id)
        .transpose()
}

pub fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| DomainError::validation(format!("{field} must be YYYY-MM-DD")))
}

// -------------------------
// Response mapping
// -------------------------

pub fn class_to_json(class: &ClassCohort) -> Value {
    json!({
        "id": class.id.to_string(),
        "name": class.name,
        "plan": class.plan.map(|p| json!({
            "enrollment_fee": p.enrollment_fee.cents(),
            "monthly_tuition": p.monthly_tuition.cents(),
        })),
        "created_at": class.created_at.to_rfc3339(),
    })
}

pub fn student_to_json(student: &Student) -> Value {
    json!({
        "id": student.id.to_string(),
        "name": student.name,
        "phone": student.phone,
        "access_code": student.access_code,
        "status": student.status.as_str(),
        "created_at": student.created_at.to_rfc3339(),
    })
}

pub fn membership_to_json(m: &ClassMembership) -> Value {
    json!({
        "id": m.id.to_string(),
        "student_id": m.student_id.to_string(),
        "class_id": m.class_id.to_string(),
        "started_at": m.started_at.to_rfc3339(),
        "ended_at": m.ended_at.map(|t| t.to_rfc3339()),
        "active": m.active,
    })
}

pub fn discount_to_json(d: &Discount) -> Value {
    json!({
        "id": d.id.to_string(),
        "student_id": d.student_id.to_string(),
        "kind": d.kind,
        "percentage": d.percentage,
        "fixed_amount": d.fixed_amount.map(|m| m.cents()),
        "created_at": d.created_at.to_rfc3339(),
    })
}

/// Invoice fields; amounts are integer cents.
pub fn invoice_to_json(invoice: &Invoice) -> Value {
    json!({
        "id": invoice.id.to_string(),
        "legacy_key": invoice.key.legacy_key(),
        "period": invoice.key.period.to_string(),
        "student_id": invoice.student_id().to_string(),
        "class_id": invoice.class_id().to_string(),
        "gross": invoice.amounts.gross.cents(),
        "discount": invoice.amounts.discount.cents(),
        "net": invoice.amounts.net.cents(),
        "due_date": invoice.due_date.to_string(),
        "payment_status": invoice.payment_status.as_str(),
        "approval_status": invoice.approval_status.as_str(),
        "created_at": invoice.created_at.to_rfc3339(),
        "updated_at": invoice.updated_at.to_rfc3339(),
    })
}

pub fn invoice_view_to_json(view: &InvoiceView) -> Value {
    let mut value = invoice_to_json(&view.invoice);
    value["payments"] = Value::Array(view.payments.iter().map(payment_to_json).collect());
    value["total_paid"] = json!(view.total_paid.cents());
    value
}

pub fn payment_to_json(p: &Payment) -> Value {
    json!({
        "id": p.id.to_string(),
        "invoice_id": p.invoice_id.to_string(),
        "paid_on": p.paid_on.to_string(),
        "amount": p.amount.cents(),
        "method": p.method.as_str(),
        "notes": p.notes,
        "created_at": p.created_at.to_rfc3339(),
    })
}

pub fn outcome_to_json(outcome: &ApprovalOutcome) -> Value {
    json!({
        "invoice": invoice_to_json(&outcome.invoice),
        "previous_status": outcome.previous_status.as_str(),
        "enrollment": {
            "change": outcome.enrollment.label(),
            "membership": outcome.enrollment.membership().map(membership_to_json),
        },
    })
}

pub fn summary_to_json(summary: &StudentSummary) -> Value {
    json!({
        "student": student_to_json(&summary.student),
        "memberships": summary.memberships.iter().map(membership_to_json).collect::<Vec<_>>(),
        "invoices": summary.invoices.iter().map(invoice_view_to_json).collect::<Vec<_>>(),
    })
}

pub fn guardian_to_json(g: &Guardian) -> Value {
    json!({
        "id": g.id.to_string(),
        "name": g.name,
        "phone": g.phone,
        "student_ids": g.student_ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "created_at": g.created_at.to_rfc3339(),
    })
}

pub fn guardian_summary_to_json(summary: &GuardianSummary) -> Value {
    json!({
        "guardian": guardian_to_json(&summary.guardian),
        "students": summary.students.iter().map(|linked| json!({
            "student": student_to_json(&linked.student),
            "memberships": linked.memberships.iter().map(membership_to_json).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
        "invoices": summary.invoices.iter().map(invoice_view_to_json).collect::<Vec<_>>(),
    })
}

pub fn cash_entry_to_json(e: &CashEntry) -> Value {
    json!({
        "id": e.id.to_string(),
        "kind": e.kind.as_str(),
        "category": e.category.as_str(),
        "description": e.description,
        "amount": e.amount.cents(),
        "occurred_on": e.occurred_on.to_string(),
        "notes": e.notes,
        "created_at": e.created_at.to_rfc3339(),
        "updated_at": e.updated_at.to_rfc3339(),
    })
}

/// Cash summary; `balance` may be negative.
pub fn cash_summary_to_json(summary: &CashSummary) -> Value {
    json!({
        "items": summary.entries.iter().map(cash_entry_to_json).collect::<Vec<_>>(),
        "income": summary.income.cents(),
        "expenses": summary.expenses.cents(),
        "enrollment_fees": summary.enrollment_fees.cents(),
        "balance": summary.balance.cents(),
    })
}

pub fn audit_to_json(entry: &AuditEntry) -> Value {
    json!({
        "id": entry.id.to_string(),
        "actor": entry.actor,
        "action": entry.action,
        "entity": entry.entity,
        "entity_id": entry.entity_id,
        "before": entry.before,
        "after": entry.after,
        "ip": entry.ip,
        "user_agent": entry.user_agent,
        "recorded_at": entry.recorded_at.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use classbook_core::ClassId;

    #[test]
    fn required_rejects_blank() {
        assert_eq!(required(Some(" x "), "name").unwrap(), "x");
        assert!(matches!(required(Some("  "), "name"), Err(DomainError::Validation(_))));
        assert!(matches!(required(None, "name"), Err(DomainError::Validation(_))));
    }

    #[test]
    fn optional_ids_treat_blank_as_absent() {
        assert_eq!(parse_optional_id::<ClassId>(None).unwrap(), None);
        assert_eq!(parse_optional_id::<ClassId>(Some("")).unwrap(), None);
        assert!(matches!(
            parse_optional_id::<ClassId>(Some("nope")),
            Err(DomainError::InvalidId(_))
        ));
    }

    #[test]
    fn cash_book_query_parses_filters() {
        let filter = CashBookQuery {
            period: Some("2025-03".into()),
            kind: Some("Expense".into()),
            category: Some(" ".into()),
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.period, Some("2025-03".parse().unwrap()));
        assert_eq!(filter.kind, Some(classbook_billing::EntryKind::Expense));
        assert_eq!(filter.category, None);

        let bad = CashBookQuery {
            period: None,
            kind: Some("gift".into()),
            category: None,
        };
        assert!(matches!(bad.into_filter(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn dates_must_be_iso() {
        assert!(parse_date("2025-03-08", "paid_on").is_ok());
        assert!(matches!(parse_date("08/03/2025", "paid_on"), Err(DomainError::Validation(_))));
    }
}
