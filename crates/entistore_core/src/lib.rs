//! Core persistence logic for entistore.
//! Transactional entity storage over an embedded SQLite database.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{Location, StoreConfig};
pub use db::{Database, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget, LoggingError};
pub use model::entity::{Entity, EntityId, FieldValue, Fields};
pub use model::schema::{EntityType, FieldDef, FieldError, FieldKind, SchemaError};
pub use repo::catalog::list_entity_types;
pub use repo::entity_repo::{
    EntityRepository, ErrorKind, RepoError, RepoResult, SqliteEntityStore,
};
pub use repo::filter::{Comparison, Condition, EntityFilter};
pub use repo::listing::{EntityCursor, EntityListing};
pub use service::entity_service::EntityService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
