//! Entity use-case service.
//!
//! # Responsibility
//! - Provide stable CRUD entry points for core callers.
//! - Delegate persistence to repository implementations.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/transaction contracts.
//! - Service layer remains storage-agnostic.

use crate::model::entity::{Entity, EntityId, Fields};
use crate::model::schema::EntityType;
use crate::repo::entity_repo::{EntityRepository, RepoError, RepoResult};
use crate::repo::filter::EntityFilter;
use crate::repo::listing::EntityListing;

/// Use-case service wrapper for entity CRUD operations.
pub struct EntityService<R: EntityRepository> {
    repo: R,
}

impl<R: EntityRepository> EntityService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn entity_type(&self) -> &EntityType {
        self.repo.entity_type()
    }

    pub fn create_entity(&self, fields: &Fields) -> RepoResult<Entity> {
        self.repo.create(fields)
    }

    /// Loads one entity; a missing entity is `Ok(None)`.
    pub fn get_entity(&self, id: EntityId) -> RepoResult<Option<Entity>> {
        match self.repo.read(id) {
            Ok(entity) => Ok(Some(entity)),
            Err(RepoError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Loads one entity; a missing entity is `RepoError::NotFound`.
    pub fn read_entity(&self, id: EntityId) -> RepoResult<Entity> {
        self.repo.read(id)
    }

    /// Updates the named fields of an existing entity.
    ///
    /// Returns repository-level not-found or validation errors unchanged.
    pub fn update_entity(&self, id: EntityId, fields: &Fields) -> RepoResult<Entity> {
        self.repo.update(id, fields)
    }

    /// Deletes an entity; deleting a missing entity succeeds.
    pub fn delete_entity(&self, id: EntityId) -> RepoResult<bool> {
        self.repo.delete(id)
    }

    /// Lazy listing; iterate it (repeatedly, if needed) to run the query.
    pub fn list_entities(&self, filter: &EntityFilter) -> EntityListing<'_, R> {
        self.repo.list(filter)
    }

    /// Materializes a listing, stopping at the first error.
    pub fn collect_entities(&self, filter: &EntityFilter) -> RepoResult<Vec<Entity>> {
        self.repo.list(filter).iter().collect()
    }

    pub fn count_entities(&self, filter: &EntityFilter) -> RepoResult<usize> {
        let mut count = 0;
        for entity in &self.repo.list(filter) {
            entity?;
            count += 1;
        }
        Ok(count)
    }
}
