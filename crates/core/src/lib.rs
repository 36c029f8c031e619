//! `classbook-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the shared error model and the money value object.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AuditEntryId, CashEntryId, ClassId, DiscountId, GuardianId, InvoiceId, MembershipId,
    PaymentId, StudentId,
};
pub use value_object::{Money, ValueObject};
