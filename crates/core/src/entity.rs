//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Students, classes, invoices and memberships are entities: two records with
/// the same identifier are the same thing even if their fields differ.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
