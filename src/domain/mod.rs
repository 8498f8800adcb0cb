//! Domain layer types and invariants.

pub mod items;
pub mod searches;
