use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use classbook_auth::JwtValidator;

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).ok_or_else(unauthorized)?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "rejected bearer token");
        unauthorized()
    })?;

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let ip = forwarded_for(req.headers()).or(peer);
    let user_agent = header_value(req.headers(), header::USER_AGENT.as_str());

    let principal = PrincipalContext::new(claims.sub, claims.roles.clone())
        .with_subjects(claims.student_id, claims.guardian_id)
        .with_origin(ip, user_agent);
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

fn unauthorized() -> Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing or invalid bearer token")
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// First hop of `x-forwarded-for`, i.e. the original client.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = header_value(headers, "x-forwarded-for")?;
    value
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(str::to_string)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}
