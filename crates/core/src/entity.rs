//! Entity trait: identity + continuity across state changes.

use chrono::{DateTime, Utc};

/// Entity marker + minimal interface.
///
/// Every domain record carries a stable identifier and a last-modified
/// marker. The backend owns the canonical copy; local state holds a
/// read-through one.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;

    /// When the record last changed (locally applied or confirmed write).
    fn last_modified(&self) -> DateTime<Utc>;
}
