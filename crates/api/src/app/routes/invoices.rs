use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;

use classbook_auth::Permission;
use classbook_billing::{ApprovalDecision, GenerateInvoices};
use classbook_core::{ClassId, InvoiceId, StudentId};
use classbook_infra::services::Services;
use classbook_infra::store::InvoiceFilter;

use crate::app::routes::common::CmdAuth;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices))
        .route("/generate", post(generate_invoices))
        .route("/:id/approval", patch(decide_invoice))
}

/// Generate (or refresh) the period's invoices for every enrolled student.
pub async fn generate_invoices(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::GenerateInvoicesRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = match dto::parse_optional_id::<ClassId>(body.class_id.as_deref()).and_then(|class_id| {
        GenerateInvoices::from_parts(class_id, body.period.as_deref(), body.gross_override)
    }) {
        Ok(c) => c,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let cmd = match CmdAuth::new(cmd, Permission::INVOICES_GENERATE).authorized(&principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services
        .billing
        .generate_invoices(&principal.actor(), cmd, Utc::now())
        .await
    {
        Ok(invoices) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "count": invoices.len(),
                "items": invoices.iter().map(dto::invoice_to_json).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::ListInvoicesQuery>, QueryRejection>,
) -> Response {
    let query = match dto::query(query) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = crate::authz::require(&principal, Permission::INVOICES_READ) {
        return resp;
    }

    let filter = match (
        dto::parse_optional_id::<StudentId>(query.student_id.as_deref()),
        dto::parse_optional_id::<ClassId>(query.class_id.as_deref()),
    ) {
        (Ok(student_id), Ok(class_id)) => InvoiceFilter {
            student_id,
            class_id,
        },
        (Err(e), _) | (_, Err(e)) => return errors::domain_error_to_response(e),
    };

    match services.billing.list_invoices(filter).await {
        Ok(views) => Json(serde_json::json!({
            "items": views.iter().map(dto::invoice_view_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Approve or reject an invoice; the student's enrollment follows the decision.
pub async fn decide_invoice(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::DecideInvoiceRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let parsed = dto::parse_id::<InvoiceId>(&id).and_then(|invoice_id| {
        body.decision
            .as_deref()
            .unwrap_or_default()
            .parse::<ApprovalDecision>()
            .map(|decision| (invoice_id, decision))
    });
    let (invoice_id, decision) = match parsed {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let (invoice_id, decision) =
        match CmdAuth::new((invoice_id, decision), Permission::INVOICES_DECIDE).authorized(&principal) {
            Ok(c) => c,
            Err(resp) => return resp,
        };

    match services
        .billing
        .decide_invoice(&principal.actor(), invoice_id, decision, Utc::now())
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(dto::outcome_to_json(&outcome))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
