use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{ClassId, Entity, MembershipId, StudentId};

/// A student's enrollment link to a class.
///
/// Invariant: at most one active membership per (student, class). Rows are
/// never deleted; leaving a class sets `ended_at` and clears `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMembership {
    pub id: MembershipId,
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Entity for ClassMembership {
    type Id = MembershipId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ClassMembership {
    /// New active membership starting at `now`.
    pub fn start(student_id: StudentId, class_id: ClassId, now: DateTime<Utc>) -> Self {
        Self {
            id: MembershipId::new(),
            student_id,
            class_id,
            started_at: now,
            ended_at: None,
            active: true,
        }
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.ended_at = Some(now);
    }

    /// Re-open the membership. The original start timestamp is kept.
    pub fn reactivate(&mut self) {
        self.active = true;
        self.ended_at = None;
    }

    pub fn links(&self, student_id: StudentId, class_id: ClassId) -> bool {
        self.student_id == student_id && self.class_id == class_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deactivate_then_reactivate_round_trip() {
        let now = Utc::now();
        let mut m = ClassMembership::start(StudentId::new(), ClassId::new(), now);
        assert!(m.active);

        m.deactivate(now);
        assert!(!m.active);
        assert_eq!(m.ended_at, Some(now));

        m.reactivate();
        assert!(m.active);
        assert_eq!(m.ended_at, None);
        assert_eq!(m.started_at, now);
    }
}
