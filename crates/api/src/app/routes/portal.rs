use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use classbook_auth::Permission;
use classbook_infra::services::Services;

use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/student/summary", get(student_summary))
        .route("/guardian/summary", get(guardian_summary))
}

/// The logged-in student's own memberships and invoices.
pub async fn student_summary(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(resp) = crate::authz::require(&principal, Permission::PORTAL_READ) {
        return resp;
    }
    let Some(student_id) = principal.student_id() else {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", "student token required");
    };

    match services.portal.student_summary(student_id).await {
        Ok(summary) => (StatusCode::OK, Json(dto::summary_to_json(&summary))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Every student linked to the logged-in guardian, with their invoices.
pub async fn guardian_summary(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(resp) = crate::authz::require(&principal, Permission::PORTAL_READ) {
        return resp;
    }
    let Some(guardian_id) = principal.guardian_id() else {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", "guardian token required");
    };

    match services.portal.guardian_summary(guardian_id).await {
        Ok(summary) => {
            (StatusCode::OK, Json(dto::guardian_summary_to_json(&summary))).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}
