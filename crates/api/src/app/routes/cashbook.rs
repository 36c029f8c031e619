//! Cash book: manual income/expense entries and the cash summary.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;

use classbook_auth::Permission;
use classbook_core::CashEntryId;
use classbook_infra::services::Services;

use crate::app::routes::common::CmdAuth;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/entries", post(create_entry).get(list_entries))
        .route("/entries/:id", put(update_entry).delete(delete_entry))
        .route("/summary", get(summary))
}

pub async fn create_entry(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CashEntryRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let input = match body.into_input() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let input = match CmdAuth::new(input, Permission::CASHBOOK_WRITE).authorized(&principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services
        .cashbook
        .create_entry(&principal.actor(), input, Utc::now())
        .await
    {
        Ok(entry) => (StatusCode::CREATED, Json(dto::cash_entry_to_json(&entry))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Full replacement of an entry's fields.
pub async fn update_entry(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::CashEntryRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let parsed = dto::parse_id::<CashEntryId>(&id)
        .and_then(|entry_id| body.into_input().map(|input| (entry_id, input)));
    let parsed = match parsed {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let (entry_id, input) =
        match CmdAuth::new(parsed, Permission::CASHBOOK_WRITE).authorized(&principal) {
            Ok(c) => c,
            Err(resp) => return resp,
        };

    match services
        .cashbook
        .update_entry(&principal.actor(), entry_id, input, Utc::now())
        .await
    {
        Ok(entry) => (StatusCode::OK, Json(dto::cash_entry_to_json(&entry))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_entry(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    let entry_id = match dto::parse_id::<CashEntryId>(&id) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let entry_id = match CmdAuth::new(entry_id, Permission::CASHBOOK_WRITE).authorized(&principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services
        .cashbook
        .delete_entry(&principal.actor(), entry_id, Utc::now())
        .await
    {
        Ok(entry) => (StatusCode::OK, Json(dto::cash_entry_to_json(&entry))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_entries(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::CashBookQuery>, QueryRejection>,
) -> Response {
    if let Err(resp) = crate::authz::require(&principal, Permission::CASHBOOK_READ) {
        return resp;
    }
    let query = match dto::query(query) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = match query.into_filter() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.cashbook.list_entries(filter).await {
        Ok(entries) => Json(serde_json::json!({
            "items": entries.iter().map(dto::cash_entry_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Filtered entries with income, expense, enrollment-fee and balance totals.
pub async fn summary(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::CashBookQuery>, QueryRejection>,
) -> Response {
    if let Err(resp) = crate::authz::require(&principal, Permission::CASHBOOK_READ) {
        return resp;
    }
    let query = match dto::query(query) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = match query.into_filter() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.cashbook.summary(filter).await {
        Ok(summary) => (StatusCode::OK, Json(dto::cash_summary_to_json(&summary))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
