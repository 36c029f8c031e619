use axum::http::StatusCode;
use axum::response::Response;

use classbook_auth::{CommandAuthorization, Permission};

use crate::app::errors;
use crate::context::PrincipalContext;

/// Small helper wrapper to associate required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, required: Permission) -> Self {
        Self {
            inner,
            required: vec![required],
        }
    }

    /// Authorize against the request principal and hand back the command.
    pub fn authorized(self, principal: &PrincipalContext) -> Result<C, Response> {
        crate::authz::authorize_command(principal, &self)
            .map_err(|e| errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))?;
        Ok(self.inner)
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}
