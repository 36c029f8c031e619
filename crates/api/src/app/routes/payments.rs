use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;

use classbook_auth::Permission;
use classbook_billing::{PaymentMethod, RecordPayment};
use classbook_core::{DomainError, InvoiceId};
use classbook_infra::services::Services;

use crate::app::routes::common::CmdAuth;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/", post(record_payment))
}

fn parse_payment(body: dto::RecordPaymentRequest) -> Result<RecordPayment, DomainError> {
    Ok(RecordPayment {
        invoice_id: dto::parse_optional_id::<InvoiceId>(body.invoice_id.as_deref())?,
        paid_on: body
            .paid_on
            .as_deref()
            .map(|raw| dto::parse_date(raw, "paid_on"))
            .transpose()?,
        amount: body.amount,
        method: body
            .method
            .as_deref()
            .map(str::parse::<PaymentMethod>)
            .transpose()?,
        notes: body.notes,
    })
}

pub async fn record_payment(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::RecordPaymentRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = match parse_payment(body) {
        Ok(c) => c,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let cmd = match CmdAuth::new(cmd, Permission::PAYMENTS_RECORD).authorized(&principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services
        .billing
        .record_payment(&principal.actor(), cmd, Utc::now())
        .await
    {
        Ok((payment, invoice)) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "payment": dto::payment_to_json(&payment),
                "invoice": dto::invoice_to_json(&invoice),
            })),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
