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
use classbook_core::ClassId;
use classbook_infra::services::{RegisterStudent, Services};

use crate::app::routes::common::CmdAuth;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/", post(register_student).get(list_students))
}

pub async fn register_student(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::RegisterStudentRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut class_ids = Vec::with_capacity(body.class_ids.len());
    for raw in &body.class_ids {
        match dto::parse_id::<ClassId>(raw) {
            Ok(id) => class_ids.push(id),
            Err(e) => return errors::domain_error_to_response(e),
        }
    }

    let cmd = RegisterStudent {
        name: body.name.unwrap_or_default(),
        phone: body.phone.unwrap_or_default(),
        class_ids,
    };
    let cmd = match CmdAuth::new(cmd, Permission::STUDENTS_WRITE).authorized(&principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services
        .registry
        .register_student(&principal.actor(), cmd, Utc::now())
        .await
    {
        Ok((student, memberships)) => {
            let mut json = dto::student_to_json(&student);
            json["memberships"] = serde_json::Value::Array(
                memberships.iter().map(dto::membership_to_json).collect(),
            );
            (StatusCode::CREATED, Json(json)).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_students(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<dto::ListStudentsQuery>, QueryRejection>,
) -> Response {
    let query = match dto::query(query) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = crate::authz::require(&principal, Permission::STUDENTS_READ) {
        return resp;
    }

    match services.registry.list_students(query.include_inactive).await {
        Ok(students) => Json(serde_json::json!({
            "items": students.iter().map(dto::student_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
