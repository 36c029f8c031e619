use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "principal_id": principal.principal_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "student_id": principal.student_id().map(|id| id.to_string()),
        "guardian_id": principal.guardian_id().map(|id| id.to_string()),
    }))
}
