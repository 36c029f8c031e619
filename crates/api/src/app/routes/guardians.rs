use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;

use classbook_auth::Permission;
use classbook_core::{GuardianId, StudentId};
use classbook_infra::services::{RegisterGuardian, Services};

use crate::app::routes::common::CmdAuth;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_guardian).get(list_guardians))
        .route("/:id/students", post(link_student))
}

pub async fn register_guardian(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::RegisterGuardianRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut student_ids = Vec::with_capacity(body.student_ids.len());
    for raw in &body.student_ids {
        match dto::parse_id::<StudentId>(raw) {
            Ok(id) => student_ids.push(id),
            Err(e) => return errors::domain_error_to_response(e),
        }
    }

    let cmd = RegisterGuardian {
        name: body.name.unwrap_or_default(),
        phone: body.phone.unwrap_or_default(),
        student_ids,
    };
    let cmd = match CmdAuth::new(cmd, Permission::GUARDIANS_WRITE).authorized(&principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services
        .registry
        .register_guardian(&principal.actor(), cmd, Utc::now())
        .await
    {
        Ok(guardian) => (StatusCode::CREATED, Json(dto::guardian_to_json(&guardian))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_guardians(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(resp) = crate::authz::require(&principal, Permission::GUARDIANS_READ) {
        return resp;
    }

    match services.registry.list_guardians().await {
        Ok(guardians) => Json(serde_json::json!({
            "items": guardians.iter().map(dto::guardian_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Link one more student to a guardian.
pub async fn link_student(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::LinkStudentRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let parsed = dto::parse_id::<GuardianId>(&id).and_then(|guardian_id| {
        dto::required(body.student_id.as_deref(), "student_id")
            .and_then(dto::parse_id::<StudentId>)
            .map(|student_id| (guardian_id, student_id))
    });
    let ids = match parsed {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let (guardian_id, student_id) =
        match CmdAuth::new(ids, Permission::GUARDIANS_WRITE).authorized(&principal) {
            Ok(c) => c,
            Err(resp) => return resp,
        };

    match services
        .registry
        .link_guardian_student(&principal.actor(), guardian_id, student_id, Utc::now())
        .await
    {
        Ok(guardian) => (StatusCode::OK, Json(dto::guardian_to_json(&guardian))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
