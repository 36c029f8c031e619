//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store and audit sink selection
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use classbook_auth::{Hs256JwtIssuer, Hs256JwtValidator, JwtIssuer};
use classbook_infra::config::AppConfig;
use classbook_infra::services::Services;
use classbook_infra::store::StoreError;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Token issuing state for the public login endpoints.
#[derive(Clone)]
pub struct LoginState {
    pub issuer: Arc<dyn JwtIssuer>,
    pub admin_key: Arc<str>,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> Result<Router, StoreError> {
    let services = services::build_services(config).await?;
    Ok(router(services, &config.jwt_secret, &config.admin_key))
}

/// Assemble routes over already-built services.
pub fn router(services: Services, jwt_secret: &str, admin_key: &str) -> Router {
    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret.as_bytes().to_vec()));
    let auth_state = middleware::AuthState { jwt };
    let login = LoginState {
        issuer: Arc::new(Hs256JwtIssuer::new(jwt_secret.as_bytes().to_vec())),
        admin_key: Arc::from(admin_key),
    };
    let services = Arc::new(services);

    // Protected routes: require a valid bearer token.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    let public = Router::new()
        .route("/health", get(routes::system::health))
        .route("/auth/admin/login", post(routes::auth::admin_login))
        .route("/auth/student/login", post(routes::auth::student_login))
        .route("/auth/guardian/login", post(routes::auth::guardian_login));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(services))
                .layer(Extension(login)),
        )
}
