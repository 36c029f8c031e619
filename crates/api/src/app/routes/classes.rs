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
use classbook_infra::services::{NewClass, Services};

use crate::app::routes::common::CmdAuth;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/", post(create_class).get(list_classes))
}

pub async fn create_class(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::CreateClassRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = NewClass {
        name: body.name.unwrap_or_default(),
        enrollment_fee: body.enrollment_fee,
        monthly_tuition: body.monthly_tuition,
    };
    let cmd = match CmdAuth::new(cmd, Permission::CLASSES_WRITE).authorized(&principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services
        .registry
        .create_class(&principal.actor(), cmd, Utc::now())
        .await
    {
        Ok(class) => (StatusCode::CREATED, Json(dto::class_to_json(&class))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_classes(
    Extension(services): Extension<Arc<Services>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(resp) = crate::authz::require(&principal, Permission::CLASSES_READ) {
        return resp;
    }

    match services.registry.list_classes().await {
        Ok(classes) => Json(serde_json::json!({
            "items": classes.iter().map(dto::class_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
