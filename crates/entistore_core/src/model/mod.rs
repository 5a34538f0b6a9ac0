//! Domain model for persisted entities.
//!
//! # Responsibility
//! - Define entity records and scalar field values.
//! - Define entity types: the declared table shape records are checked against.
//!
//! # Invariants
//! - Every entity is identified by a store-assigned `EntityId`.
//! - Deletion removes the record; ids are never reused.

pub mod entity;
pub mod schema;
