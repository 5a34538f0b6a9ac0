//! Pooled database bootstrap.
//!
//! # Responsibility
//! - Build the r2d2 pool for file or in-memory SQLite databases.
//! - Configure pragmas on every pooled connection.
//! - Trigger schema migrations before returning a usable handle.
//!
//! # Invariants
//! - Pooled connections have `foreign_keys=ON` and the configured busy timeout.
//! - File databases run in WAL mode.
//! - The in-memory pool never recycles its only connection; doing so would
//!   drop the whole database.

use super::migrations::{apply_migrations, current_user_version};
use super::{DbError, DbResult};
use crate::config::{Location, StoreConfig};
use log::{error, info};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scoped pooled connection; returned to the pool when dropped.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Explicit, cloneable handle to one embedded database.
///
/// Constructed once at startup and passed to every store. Clones share the
/// same pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    config: Arc<StoreConfig>,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub connections: u32,
    pub idle_connections: u32,
}

impl Database {
    /// Opens the configured database and applies all pending migrations.
    ///
    /// # Side effects
    /// - Creates the database file when it does not exist.
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(config: &StoreConfig) -> DbResult<Self> {
        let started_at = Instant::now();
        let mode = config.location.mode();
        info!("event=db_open module=db status=start mode={mode}");

        match Self::bootstrap(config) {
            Ok(db) => {
                info!(
                    "event=db_open module=db status=ok mode={mode} pool_size={} duration_ms={}",
                    config.effective_pool_size(),
                    started_at.elapsed().as_millis()
                );
                Ok(db)
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={mode} duration_ms={} error_code={} error={}",
                    started_at.elapsed().as_millis(),
                    error_code(&err),
                    err
                );
                Err(err)
            }
        }
    }

    /// Opens a private in-memory database with default settings.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Opens a database file with default settings.
    pub fn open_file(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::open(&StoreConfig::file(path))
    }

    /// Checks out a pooled connection.
    ///
    /// Blocks up to `connection_timeout` when every connection is in use.
    pub fn connection(&self) -> DbResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the applied schema migration version.
    pub fn schema_version(&self) -> DbResult<u32> {
        let conn = self.connection()?;
        current_user_version(&conn)
    }

    pub fn pool_status(&self) -> PoolStatus {
        let state = self.pool.state();
        PoolStatus {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    fn bootstrap(config: &StoreConfig) -> DbResult<Self> {
        if config.pool_size == 0 {
            return Err(DbError::InvalidConfig("pool_size must be positive".to_string()));
        }
        if config.page_size == 0 {
            return Err(DbError::InvalidConfig("page_size must be positive".to_string()));
        }

        let busy_timeout = config.busy_timeout;
        let manager = match &config.location {
            Location::Memory => SqliteConnectionManager::memory()
                .with_init(move |conn| configure_connection(conn, busy_timeout, false)),
            Location::File(path) => {
                // r2d2 keeps retrying a failing manager until the checkout
                // timeout; probe once so bad paths fail immediately.
                let mut probe = Connection::open(path)?;
                configure_connection(&mut probe, busy_timeout, true)?;
                drop(probe);

                SqliteConnectionManager::file(path)
                    .with_init(move |conn| configure_connection(conn, busy_timeout, true))
            }
        };

        let pool = Pool::builder()
            .max_size(config.effective_pool_size())
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(config.connection_timeout)
            .build(manager)?;

        let mut conn = pool.get()?;
        apply_migrations(&mut conn)?;
        drop(conn);

        Ok(Self {
            pool,
            config: Arc::new(config.clone()),
        })
    }
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.config.location)
            .field("pool_status", &self.pool_status())
            .finish()
    }
}

fn configure_connection(
    conn: &mut Connection,
    busy_timeout: Duration,
    wal: bool,
) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if wal {
        // journal_mode reports the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    }
    Ok(())
}

fn error_code(err: &DbError) -> &'static str {
    match err {
        DbError::Sqlite(_) => "db_open_failed",
        DbError::Pool(_) => "db_pool_failed",
        DbError::UnsupportedSchemaVersion { .. } => "db_schema_unsupported",
        DbError::InvalidConfig(_) => "db_config_invalid",
    }
}
