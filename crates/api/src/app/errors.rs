use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use classbook_core::DomainError;
use classbook_infra::services::ServiceError;
use classbook_infra::store::StoreError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        ServiceError::Store(e) => store_error_to_response(e),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::Unauthorized => {
            json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid credentials")
        }
        DomainError::AccessBlocked(msg) => json_error(StatusCode::FORBIDDEN, "access_blocked", msg),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Domain(e) => domain_error_to_response(e),
        StoreError::NotFound(entity) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{entity} not found"))
        }
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Backend(msg) => {
            error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage failure")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
