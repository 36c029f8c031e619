use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier, e.g. `"billing.generate"`.
///
/// The wildcard `"*"` is granted to admins and satisfies every check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub const CLASSES_WRITE: Permission = Permission(Cow::Borrowed("classes.write"));
    pub const CLASSES_READ: Permission = Permission(Cow::Borrowed("classes.read"));
    pub const STUDENTS_WRITE: Permission = Permission(Cow::Borrowed("students.write"));
    pub const STUDENTS_READ: Permission = Permission(Cow::Borrowed("students.read"));
    pub const DISCOUNTS_WRITE: Permission = Permission(Cow::Borrowed("discounts.write"));
    pub const DISCOUNTS_READ: Permission = Permission(Cow::Borrowed("discounts.read"));
    pub const INVOICES_GENERATE: Permission = Permission(Cow::Borrowed("billing.generate"));
    pub const INVOICES_READ: Permission = Permission(Cow::Borrowed("billing.read"));
    pub const INVOICES_DECIDE: Permission = Permission(Cow::Borrowed("billing.decide"));
    pub const PAYMENTS_RECORD: Permission = Permission(Cow::Borrowed("billing.pay"));
    pub const GUARDIANS_WRITE: Permission = Permission(Cow::Borrowed("guardians.write"));
    pub const GUARDIANS_READ: Permission = Permission(Cow::Borrowed("guardians.read"));
    pub const CASHBOOK_WRITE: Permission = Permission(Cow::Borrowed("cashbook.write"));
    pub const CASHBOOK_READ: Permission = Permission(Cow::Borrowed("cashbook.read"));
    pub const AUDIT_READ: Permission = Permission(Cow::Borrowed("audit.read"));
    pub const PORTAL_READ: Permission = Permission(Cow::Borrowed("portal.read"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
