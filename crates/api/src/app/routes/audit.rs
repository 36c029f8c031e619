use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    response::{IntoResponse, Response},
    Json,
};

use classbook_auth::Permission;
use classbook_infra::services::Services;

use crate::app::{dto, errors};
use crate::context::PrincipalContext;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Audit entries, newest first.
pub async fn list_audit(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::AuditQuery>, QueryRejection>,
) -> Response {
    let query = match dto::query(query) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = crate::authz::require(&principal, Permission::AUDIT_READ) {
        return resp;
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    match services.audit_log(limit).await {
        Ok(entries) => Json(serde_json::json!({
            "items": entries.iter().map(dto::audit_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
