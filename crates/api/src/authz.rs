//! API-side authorization guard for commands.
//!
//! This enforces authorization at the command boundary (before dispatch),
//! while keeping the billing domain and infra auth-agnostic.

use axum::http::StatusCode;
use axum::response::Response;

use classbook_auth::{authorize, AuthzError, CommandAuthorization, Permission, Principal};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Check authorization for a command in the current request context.
///
/// This is intended to be called **before** dispatching a command.
pub fn authorize_command<C: CommandAuthorization>(
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let principal = Principal::from_roles(principal.principal_id(), principal.roles().to_vec());

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

/// Guard for read endpoints: a single permission, mapped to a 403 response.
pub fn require(principal: &PrincipalContext, permission: Permission) -> Result<(), Response> {
    let principal = Principal::from_roles(principal.principal_id(), principal.roles().to_vec());
    authorize(&principal, &permission)
        .map_err(|e| json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}
