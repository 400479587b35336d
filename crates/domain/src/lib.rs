//! `wareflow-domain` — inventory domain records and mutations.
//!
//! Pure domain types: [`Product`], [`Movement`], and the [`Mutation`]
//! vocabulary replayed by the offline queue. No I/O here.

pub mod movement;
pub mod mutation;
pub mod product;

pub use movement::{Movement, MovementKind};
pub use mutation::{Mutation, MutationKind, NewMovement, NewProduct};
pub use product::{Product, ProductPatch};
