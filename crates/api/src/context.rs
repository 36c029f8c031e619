use classbook_auth::{PrincipalId, Role};
use classbook_core::{GuardianId, StudentId};
use classbook_infra::audit::Actor;

/// Principal context for a request (authenticated identity + roles).
///
/// Inserted by the auth middleware; present on every protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
    student_id: Option<StudentId>,
    guardian_id: Option<GuardianId>,
    ip: Option<String>,
    user_agent: Option<String>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self {
            principal_id,
            roles,
            student_id: None,
            guardian_id: None,
            ip: None,
            user_agent: None,
        }
    }

    pub fn with_subjects(
        mut self,
        student_id: Option<StudentId>,
        guardian_id: Option<GuardianId>,
    ) -> Self {
        self.student_id = student_id;
        self.guardian_id = guardian_id;
        self
    }

    /// Client address and user agent of the request, for the audit log.
    pub fn with_origin(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Set for student tokens.
    pub fn student_id(&self) -> Option<StudentId> {
        self.student_id
    }

    /// Set for guardian tokens.
    pub fn guardian_id(&self) -> Option<GuardianId> {
        self.guardian_id
    }

    /// Who is acting, as recorded in the audit log.
    pub fn actor(&self) -> Actor {
        let role = self.roles.first().map(Role::as_str).unwrap_or("unknown");
        Actor::new(format!("{role}:{}", self.principal_id))
            .with_origin(self.ip.clone(), self.user_agent.clone())
    }
}
