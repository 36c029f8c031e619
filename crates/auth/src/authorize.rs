use std::collections::HashSet;

use thiserror::Error;

use crate::{Permission, PrincipalId, Role};

/// A resolved caller for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    /// Resolve permissions from roles: `admin` grants the wildcard, `student`
    /// and `guardian` grant portal access only.
    pub fn from_roles(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        let mut permissions = Vec::new();
        if roles.iter().any(Role::is_admin) {
            permissions.push(Permission::WILDCARD);
        }
        if roles.iter().any(|r| r.is_student() || r.is_guardian()) {
            permissions.push(Permission::PORTAL_READ);
        }
        Self {
            principal_id,
            roles,
            permissions,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Command-side authorization contract (checked at the command boundary).
///
/// The API layer enforces these requirements before dispatching.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Authorize a principal for one permission.
///
/// - No IO
/// - No panics
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = principal.permissions.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_wildcard_allows_everything() {
        let admin = Principal::from_roles(PrincipalId::new(), vec![Role::ADMIN]);
        assert!(authorize(&admin, &Permission::INVOICES_DECIDE).is_ok());
        assert!(authorize(&admin, &Permission::new("anything.else")).is_ok());
    }

    #[test]
    fn student_is_limited_to_portal() {
        let student = Principal::from_roles(PrincipalId::new(), vec![Role::STUDENT]);
        assert!(authorize(&student, &Permission::PORTAL_READ).is_ok());
        match authorize(&student, &Permission::PAYMENTS_RECORD) {
            Err(AuthzError::Forbidden(p)) if p == "billing.pay" => {}
            other => panic!("expected forbidden, got {other:?}"),
        }
    }

    #[test]
    fn guardian_is_limited_to_portal() {
        let guardian = Principal::from_roles(PrincipalId::new(), vec![Role::GUARDIAN]);
        assert_eq!(guardian.permissions, vec![Permission::PORTAL_READ]);
        assert!(authorize(&guardian, &Permission::CASHBOOK_READ).is_err());
    }

    #[test]
    fn unknown_role_has_no_permissions() {
        let viewer = Principal::from_roles(PrincipalId::new(), vec![Role::new("viewer")]);
        assert!(viewer.permissions.is_empty());
        assert!(authorize(&viewer, &Permission::CLASSES_READ).is_err());
    }
}
