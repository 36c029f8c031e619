//! Students and classes, the registry the billing flows operate on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classbook_core::{ClassId, DomainError, Entity, Money, StudentId};

/// Prefix of generated student access codes.
pub const ACCESS_CODE_PREFIX: char = 'R';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Active,
    Inactive,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Active => "active",
            StudentStatus::Inactive => "inactive",
        }
    }
}

impl core::str::FromStr for StudentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(DomainError::validation(format!("unknown student status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub phone: String,
    /// Login code, e.g. `R007`. Unique, stored uppercase.
    pub access_code: String,
    pub status: StudentStatus,
    pub created_at: DateTime<Utc>,
}

impl Entity for Student {
    type Id = StudentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Student {
    /// Register a student. `access_code` comes from [`next_access_code`].
    pub fn register(
        name: &str,
        phone: &str,
        access_code: String,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("student name is required"));
        }
        let phone = phone.trim();
        if phone_digits(phone).is_empty() {
            return Err(DomainError::validation("student phone is required"));
        }
        Ok(Self {
            id: StudentId::new(),
            name: name.to_string(),
            phone: phone.to_string(),
            access_code,
            status: StudentStatus::Active,
            created_at: now,
        })
    }
}

/// Enrollment fee and monthly tuition of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialPlan {
    pub enrollment_fee: Money,
    pub monthly_tuition: Money,
}

impl FinancialPlan {
    pub fn new(enrollment_fee: i64, monthly_tuition: i64) -> Result<Self, DomainError> {
        Ok(Self {
            enrollment_fee: Money::non_negative(enrollment_fee, "enrollment_fee")?,
            monthly_tuition: Money::non_negative(monthly_tuition, "monthly_tuition")?,
        })
    }
}

/// A class (cohort) students enroll in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCohort {
    pub id: ClassId,
    pub name: String,
    pub plan: Option<FinancialPlan>,
    pub created_at: DateTime<Utc>,
}

impl Entity for ClassCohort {
    type Id = ClassId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ClassCohort {
    pub fn create(
        name: &str,
        plan: Option<FinancialPlan>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("class name is required"));
        }
        Ok(Self {
            id: ClassId::new(),
            name: name.to_string(),
            plan,
            created_at: now,
        })
    }
}

/// Next access code after the highest existing one: `R001`, `R002`, ...
///
/// Codes that do not follow the `R<digits>` shape are ignored. Past `R999`
/// the number simply grows wider.
pub fn next_access_code<'a, I>(existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let highest = existing
        .into_iter()
        .filter_map(|code| {
            code.trim()
                .to_ascii_uppercase()
                .strip_prefix(ACCESS_CODE_PREFIX)
                .and_then(|n| n.parse::<u32>().ok())
        })
        .max()
        .unwrap_or(0);
    format!("{ACCESS_CODE_PREFIX}{:03}", highest.saturating_add(1))
}

/// Digits of a phone number, dropping formatting.
pub fn phone_digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}
