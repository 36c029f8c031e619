use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier carried in tokens.
///
/// Roles stay opaque strings on the wire. The system issues `admin` (school
/// staff), `student` and `guardian` (portal access).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const STUDENT: Role = Role(Cow::Borrowed("student"));
    pub const GUARDIAN: Role = Role(Cow::Borrowed("guardian"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.as_str() == "admin"
    }

    pub fn is_student(&self) -> bool {
        self.as_str() == "student"
    }

    pub fn is_guardian(&self) -> bool {
        self.as_str() == "guardian"
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
