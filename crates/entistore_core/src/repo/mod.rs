//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the entity data access contract.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes validate payloads against the entity type first.
//! - Repository APIs return semantic errors (`NotFound`) in addition to
//!   storage errors.

pub mod catalog;
pub mod entity_repo;
pub mod filter;
pub mod listing;
