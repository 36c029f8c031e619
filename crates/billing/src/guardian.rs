//! Guardians and their portal login.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{DomainError, Entity, GuardianId, StudentId};

use crate::registry::phone_digits;

/// A parent or guardian linked to one or more students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    pub id: GuardianId,
    pub name: String,
    pub phone: String,
    /// Linked students, without duplicates.
    pub student_ids: Vec<StudentId>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Guardian {
    type Id = GuardianId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Guardian {
    pub fn register(
        name: &str,
        phone: &str,
        student_ids: Vec<StudentId>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("guardian name is required"));
        }
        let phone = phone.trim();
        if phone_digits(phone).is_empty() {
            return Err(DomainError::validation("guardian phone is required"));
        }
        let mut guardian = Self {
            id: GuardianId::new(),
            name: name.to_string(),
            phone: phone.to_string(),
            student_ids: Vec::with_capacity(student_ids.len()),
            created_at: now,
        };
        for id in student_ids {
            guardian.link(id);
        }
        Ok(guardian)
    }

    /// Link a student. Returns `false` when already linked.
    pub fn link(&mut self, student_id: StudentId) -> bool {
        if self.student_ids.contains(&student_id) {
            return false;
        }
        self.student_ids.push(student_id);
        true
    }
}

/// Name comparison used by the guardian login: trimmed, case-insensitive.
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Pick the guardian whose name and phone match the supplied credentials.
///
/// `candidates` may hold several guardians with the same name; the phone
/// (digits only) disambiguates. A guardian without linked students cannot log
/// in, and is indistinguishable from a failed match.
pub fn match_guardian<'a>(
    candidates: &'a [Guardian],
    name: &str,
    phone: &str,
) -> Result<&'a Guardian, DomainError> {
    let supplied = phone_digits(phone);
    if supplied.is_empty() {
        return Err(DomainError::Unauthorized);
    }
    candidates
        .iter()
        .filter(|g| !g.student_ids.is_empty() && same_name(&g.name, name))
        .find(|g| phone_digits(&g.phone) == supplied)
        .ok_or(DomainError::Unauthorized)
}
