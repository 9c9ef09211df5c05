//! Domain layer types and invariants.

pub mod link;
pub mod schedule;
