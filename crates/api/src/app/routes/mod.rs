use axum::{routing::get, Router};

pub mod audit;
pub mod auth;
pub mod cashbook;
pub mod classes;
pub mod common;
pub mod discounts;
pub mod guardians;
pub mod invoices;
pub mod payments;
pub mod portal;
pub mod students;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/audit", get(audit::list_audit))
        .nest("/portal", portal::router())
        .nest("/classes", classes::router())
        .nest("/students", students::router())
        .nest("/guardians", guardians::router())
        .nest("/billing/discounts", discounts::router())
        .nest("/billing/invoices", invoices::router())
        .nest("/billing/payments", payments::router())
        .nest("/billing/cashbook", cashbook::router())
}
