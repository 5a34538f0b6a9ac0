//! Lazy, restartable entity listings.
//!
//! # Responsibility
//! - Walk a filtered entity set in ascending id order one page at a time.
//!
//! # Invariants
//! - Pages are fetched with keyset pagination (`id > last_seen`), so no
//!   entity is yielded twice even when rows are inserted mid-walk.
//! - No connection is held between pages.
//! - Every `iter()` call starts a fresh walk from the lowest id.
//! - A failed page fetch is yielded once; the cursor then ends.

use crate::model::entity::{Entity, EntityId};
use crate::repo::entity_repo::{EntityRepository, RepoResult};
use crate::repo::filter::EntityFilter;
use std::collections::VecDeque;

/// A filtered view over one repository. Iterating it runs queries.
pub struct EntityListing<'r, R: EntityRepository> {
    repo: &'r R,
    filter: EntityFilter,
    page_size: u32,
}

impl<'r, R: EntityRepository> EntityListing<'r, R> {
    pub fn new(repo: &'r R, filter: EntityFilter) -> Self {
        Self {
            repo,
            filter,
            page_size: repo.page_size().max(1),
        }
    }

    /// Overrides the number of rows fetched per round trip.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn filter(&self) -> &EntityFilter {
        &self.filter
    }

    /// Starts a new walk from the beginning.
    pub fn iter(&self) -> EntityCursor<'_, R> {
        EntityCursor {
            repo: self.repo,
            filter: &self.filter,
            page_size: self.page_size,
            after: None,
            buffer: VecDeque::new(),
            yielded: 0,
            exhausted: false,
            done: false,
        }
    }
}

impl<'a, 'r, R: EntityRepository> IntoIterator for &'a EntityListing<'r, R> {
    type Item = RepoResult<Entity>;
    type IntoIter = EntityCursor<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One walk over an [`EntityListing`].
pub struct EntityCursor<'a, R: EntityRepository> {
    repo: &'a R,
    filter: &'a EntityFilter,
    page_size: u32,
    after: Option<EntityId>,
    buffer: VecDeque<Entity>,
    yielded: u32,
    exhausted: bool,
    done: bool,
}

impl<R: EntityRepository> EntityCursor<'_, R> {
    fn remaining(&self) -> Option<u32> {
        self.filter
            .max_results()
            .map(|limit| limit.saturating_sub(self.yielded))
    }

    fn fill_buffer(&mut self) -> RepoResult<()> {
        let page = match self.remaining() {
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };
        let entities = self.repo.fetch_page(self.filter, self.after, page)?;
        if entities.len() < page as usize {
            self.exhausted = true;
        }
        self.buffer.extend(entities);
        Ok(())
    }
}

impl<R: EntityRepository> Iterator for EntityCursor<'_, R> {
    type Item = RepoResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining() == Some(0) {
            self.done = true;
            return None;
        }

        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill_buffer() {
                self.done = true;
                return Some(Err(err));
            }
        }

        match self.buffer.pop_front() {
            Some(entity) => {
                self.after = Some(entity.id);
                self.yielded += 1;
                Some(Ok(entity))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
