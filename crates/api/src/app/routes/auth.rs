//! Public login endpoints: exchange credentials for a bearer token.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{info, warn};

use classbook_auth::{secrets_match, JwtClaims};
use classbook_infra::services::Services;

use crate::app::{dto, errors, LoginState};

pub async fn admin_login(
    Extension(login): Extension<LoginState>,
    payload: Result<Json<dto::AdminLoginRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let key = match dto::required(body.admin_key.as_deref(), "admin_key") {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    if !secrets_match(key.as_bytes(), login.admin_key.as_bytes()) {
        warn!("admin login rejected");
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid credentials");
    }

    let claims = JwtClaims::admin(Utc::now());
    issue(&login, claims, |claims| {
        info!(principal_id = %claims.sub, "admin logged in");
        serde_json::json!({})
    })
}

pub async fn student_login(
    Extension(services): Extension<Arc<Services>>,
    Extension(login): Extension<LoginState>,
    payload: Result<Json<dto::StudentLoginRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (code, phone) = match (
        dto::required(body.access_code.as_deref(), "access_code"),
        dto::required(body.phone.as_deref(), "phone"),
    ) {
        (Ok(code), Ok(phone)) => (code, phone),
        (Err(e), _) | (_, Err(e)) => return errors::domain_error_to_response(e),
    };

    let student = match services.portal.student_login(code, phone).await {
        Ok(s) => s,
        Err(e) => return errors::service_error_to_response(e),
    };

    issue(&login, JwtClaims::student(student.id, Utc::now()), |_| {
        serde_json::json!({ "student": dto::student_to_json(&student) })
    })
}

pub async fn guardian_login(
    Extension(services): Extension<Arc<Services>>,
    Extension(login): Extension<LoginState>,
    payload: Result<Json<dto::GuardianLoginRequest>, JsonRejection>,
) -> Response {
    let body = match dto::body(payload) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (name, phone) = match (
        dto::required(body.name.as_deref(), "name"),
        dto::required(body.phone.as_deref(), "phone"),
    ) {
        (Ok(name), Ok(phone)) => (name, phone),
        (Err(e), _) | (_, Err(e)) => return errors::domain_error_to_response(e),
    };

    let guardian = match services.portal.guardian_login(name, phone).await {
        Ok(g) => g,
        Err(e) => return errors::service_error_to_response(e),
    };

    issue(&login, JwtClaims::guardian(guardian.id, Utc::now()), |_| {
        serde_json::json!({ "guardian": dto::guardian_to_json(&guardian) })
    })
}

fn issue(
    login: &LoginState,
    claims: JwtClaims,
    extra: impl FnOnce(&JwtClaims) -> serde_json::Value,
) -> Response {
    let token = match login.issuer.issue(&claims) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to sign token");
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "token_error", "failed to sign token");
        }
    };

    let mut body = extra(&claims);
    body["token"] = serde_json::json!(token);
    body["expires_at"] = serde_json::json!(claims.expires_at.to_rfc3339());
    body["roles"] = serde_json::json!(claims.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>());
    (StatusCode::OK, Json(body)).into_response()
}
