use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use classbook_core::{GuardianId, StudentId};

/// Token subject: an admin session, a student or a guardian.
///
/// Portal tokens use the student's or guardian's own id as subject.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<StudentId> for PrincipalId {
    fn from(value: StudentId) -> Self {
        Self(*value.as_uuid())
    }
}

impl From<GuardianId> for PrincipalId {
    fn from(value: GuardianId) -> Self {
        Self(*value.as_uuid())
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PrincipalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}
