//! Store configuration.
//!
//! # Responsibility
//! - Describe where the database lives and how connections are pooled.
//!
//! # Invariants
//! - In-memory databases are private to one connection, so they always use a
//!   pool of exactly one connection regardless of `pool_size`.

use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_POOL_SIZE: u32 = 4;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 64;

/// Textual location that selects an in-memory database.
pub const MEMORY_LOCATION: &str = ":memory:";

/// Where the database is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Memory,
    File(PathBuf),
}

impl Location {
    /// Parses `:memory:` or a filesystem path.
    pub fn parse(value: &str) -> Self {
        if value.trim() == MEMORY_LOCATION {
            Self::Memory
        } else {
            Self::File(PathBuf::from(value))
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File(_) => "file",
        }
    }
}

/// Connection and paging settings for a [`crate::Database`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub location: Location,
    /// Maximum pooled connections for file databases.
    pub pool_size: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// How long a caller waits for a free pooled connection.
    pub connection_timeout: Duration,
    /// Rows fetched per round trip by lazy listings.
    pub page_size: u32,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            pool_size: 1,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::File(path.as_ref().to_path_buf()),
            pool_size: DEFAULT_POOL_SIZE,
            ..Self::in_memory()
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub(crate) fn effective_pool_size(&self) -> u32 {
        match self.location {
            Location::Memory => 1,
            Location::File(_) => self.pool_size,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}
