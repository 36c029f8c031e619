use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;

use classbook_auth::Permission;
use classbook_billing::NewDiscount;
use classbook_core::StudentId;
use classbook_infra::services::Services;

use crate::app::routes::common::CmdAuth;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/", post(create_discount).get(list_discounts))
}

pub async fn create_discount(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateDiscountRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student_id = match dto::required(body.student_id.as_deref(), "student_id")
        .and_then(dto::parse_id::<StudentId>)
    {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let cmd = NewDiscount {
        student_id,
        kind: body.kind.unwrap_or_default(),
        percentage: body.percentage,
        fixed_amount: body.fixed_amount,
    };
    let cmd = match CmdAuth::new(cmd, Permission::DISCOUNTS_WRITE).authorized(&principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services
        .registry
        .create_discount(&principal.actor(), cmd, Utc::now())
        .await
    {
        Ok(discount) => (StatusCode::CREATED, Json(dto::discount_to_json(&discount))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_discounts(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::ListDiscountsQuery>, QueryRejection>,
) -> Response {
    let query = match dto::query(query) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = crate::authz::require(&principal, Permission::DISCOUNTS_READ) {
        return resp;
    }
    let student_id = match dto::parse_optional_id::<StudentId>(query.student_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.registry.list_discounts(student_id).await {
        Ok(discounts) => Json(serde_json::json!({
            "items": discounts.iter().map(dto::discount_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
