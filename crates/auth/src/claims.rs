use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use classbook_core::{GuardianId, StudentId};

use crate::{PrincipalId, Role};

/// Admin sessions last 12 hours.
pub const ADMIN_TOKEN_TTL_HOURS: i64 = 12;

/// Student and guardian portal sessions last 7 days.
pub const STUDENT_TOKEN_TTL_DAYS: i64 = 7;

/// JWT claims model (transport-agnostic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject / principal identifier.
    pub sub: PrincipalId,

    /// Roles granted to the subject.
    pub roles: Vec<Role>,

    /// Set on student tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<StudentId>,

    /// Set on guardian tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_id: Option<GuardianId>,

    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl JwtClaims {
    pub fn admin(now: DateTime<Utc>) -> Self {
        Self {
            sub: PrincipalId::new(),
            roles: vec![Role::ADMIN],
            student_id: None,
            guardian_id: None,
            issued_at: now,
            expires_at: now + Duration::hours(ADMIN_TOKEN_TTL_HOURS),
        }
    }

    pub fn student(student_id: StudentId, now: DateTime<Utc>) -> Self {
        Self {
            sub: student_id.into(),
            roles: vec![Role::STUDENT],
            student_id: Some(student_id),
            guardian_id: None,
            issued_at: now,
            expires_at: now + Duration::days(STUDENT_TOKEN_TTL_DAYS),
        }
    }

    pub fn guardian(guardian_id: GuardianId, now: DateTime<Utc>) -> Self {
        Self {
            sub: guardian_id.into(),
            roles: vec![Role::GUARDIAN],
            student_id: None,
            guardian_id: Some(guardian_id),
            issued_at: now,
            expires_at: now + Duration::days(STUDENT_TOKEN_TTL_DAYS),
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("student token without student_id")]
    MissingStudentId,

    #[error("guardian token without guardian_id")]
    MissingGuardianId,
}

/// Deterministically validate JWT claims against `now`.
///
/// Signature verification happens in [`crate::jwt`]; this checks the time
/// window and that portal tokens name their student or guardian.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    if claims.has_role(&Role::STUDENT) && claims.student_id.is_none() {
        return Err(TokenValidationError::MissingStudentId);
    }
    if claims.has_role(&Role::GUARDIAN) && claims.guardian_id.is_none() {
        return Err(TokenValidationError::MissingGuardianId);
    }
    Ok(())
}
