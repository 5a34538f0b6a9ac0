//! Entity repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD and filtered listing over one entity type's table.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Every mutation runs in a `BEGIN IMMEDIATE` transaction that commits on
//!   success and rolls back on any error (the guard rolls back on drop).
//! - Pooled connections are scoped to one operation, so they return to the
//!   pool on every exit path.
//! - Write payloads pass `EntityType` validation before any SQL runs.
//! - `delete` is idempotent.

use crate::config::DEFAULT_PAGE_SIZE;
use crate::db::{Database, DbError};
use crate::model::entity::{Entity, EntityId, FieldValue, Fields};
use crate::model::schema::{quote_ident, EntityType, FieldError, FieldKind, SchemaError, ID_COLUMN};
use crate::repo::catalog;
use crate::repo::filter::EntityFilter;
use crate::repo::listing::EntityListing;
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

pub type RepoResult<T> = Result<T, RepoError>;

/// Caller-facing classification of every [`RepoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection, constraint or validation failure. Fatal to the operation,
    /// never retried by the store.
    Storage,
    /// The addressed entity does not exist. Recoverable.
    NotFound,
}

/// Errors from entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite, pool or bootstrap error.
    Db(DbError),
    /// Invalid entity type declaration.
    Schema(SchemaError),
    /// Field payload or filter does not fit the entity type.
    Field(FieldError),
    /// Write rejected by a table constraint (`UNIQUE`, `NOT NULL`, `CHECK`).
    Constraint(String),
    /// Target entity does not exist.
    NotFound(EntityId),
    /// No entity type with this name is registered.
    UnknownEntityType(String),
    /// A different definition is already registered under this name.
    SchemaMismatch { entity_type: String },
    /// Entity type table is missing.
    MissingRequiredTable(String),
    /// Entity type table lacks a declared column.
    MissingRequiredColumn { table: String, column: String },
    /// Persisted data cannot be converted to a valid entity.
    InvalidData(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Storage,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Stable machine-readable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(DbError::Pool(_)) => "storage_connection",
            Self::Db(_) => "storage_db",
            Self::Schema(_) => "storage_schema_invalid",
            Self::Field(_) => "storage_validation",
            Self::Constraint(_) => "storage_constraint",
            Self::NotFound(_) => "not_found",
            Self::UnknownEntityType(_) => "storage_unknown_type",
            Self::SchemaMismatch { .. } => "storage_schema_mismatch",
            Self::MissingRequiredTable(_) | Self::MissingRequiredColumn { .. } => {
                "storage_schema_missing"
            }
            Self::InvalidData(_) => "storage_invalid_data",
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::Field(err) => write!(f, "{err}"),
            Self::Constraint(message) => write!(f, "constraint violation: {message}"),
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::UnknownEntityType(name) => write!(f, "unknown entity type `{name}`"),
            Self::SchemaMismatch { entity_type } => write!(
                f,
                "entity type `{entity_type}` is already defined with different fields"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "entity store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "entity store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted entity data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Schema(err) => Some(err),
            Self::Field(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if value.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
            return Self::Constraint(value.to_string());
        }
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<r2d2::Error> for RepoError {
    fn from(value: r2d2::Error) -> Self {
        Self::Db(DbError::Pool(value))
    }
}

impl From<SchemaError> for RepoError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<FieldError> for RepoError {
    fn from(value: FieldError) -> Self {
        Self::Field(value)
    }
}

/// Repository interface for one entity type.
pub trait EntityRepository {
    /// Entity type every operation is checked against.
    fn entity_type(&self) -> &EntityType;

    /// Inserts a new entity and returns it with its assigned id.
    fn create(&self, fields: &Fields) -> RepoResult<Entity>;

    /// Loads one entity; `RepoError::NotFound` when absent.
    fn read(&self, id: EntityId) -> RepoResult<Entity>;

    /// Replaces the named fields, leaving the others untouched.
    fn update(&self, id: EntityId, fields: &Fields) -> RepoResult<Entity>;

    /// Removes one entity. Returns whether a row was removed.
    fn delete(&self, id: EntityId) -> RepoResult<bool>;

    /// Loads up to `limit` matching entities with `id > after`, ascending.
    fn fetch_page(
        &self,
        filter: &EntityFilter,
        after: Option<EntityId>,
        limit: u32,
    ) -> RepoResult<Vec<Entity>>;

    /// Rows fetched per round trip by [`EntityRepository::list`].
    fn page_size(&self) -> u32 {
        DEFAULT_PAGE_SIZE
    }

    /// Lazy, restartable listing of matching entities in ascending id order.
    fn list(&self, filter: &EntityFilter) -> EntityListing<'_, Self>
    where
        Self: Sized,
    {
        EntityListing::new(self, filter.clone())
    }
}

/// SQLite-backed entity store bound to one registered entity type.
///
/// Cheap to clone and safe to share across threads; clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct SqliteEntityStore {
    db: Database,
    entity_type: Arc<EntityType>,
}

impl SqliteEntityStore {
    /// Registers `entity_type` (creating its table) and binds a store to it.
    ///
    /// Idempotent for an identical definition, including one whose name
    /// differs only in case; a conflicting definition under the same name
    /// fails with `RepoError::SchemaMismatch`.
    pub fn define(db: &Database, entity_type: EntityType) -> RepoResult<Self> {
        let mut conn = db.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (entity_type, created) = catalog::register(&tx, entity_type)?;
        tx.commit()?;

        info!(
            "event=entity_type_define module=repo status=ok entity_type={} created={created}",
            entity_type.name()
        );
        Ok(Self {
            db: db.clone(),
            entity_type: Arc::new(entity_type),
        })
    }

    /// Binds a store to an entity type registered earlier.
    pub fn open(db: &Database, name: &str) -> RepoResult<Self> {
        let conn = db.connection()?;
        let entity_type = catalog::load(&conn, name)?
            .ok_or_else(|| RepoError::UnknownEntityType(name.to_string()))?;
        catalog::ensure_table_ready(&conn, &entity_type)?;

        Ok(Self {
            db: db.clone(),
            entity_type: Arc::new(entity_type),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn table(&self) -> String {
        quote_ident(self.entity_type.name())
    }

    fn select_sql(&self) -> String {
        let columns = std::iter::once(ID_COLUMN)
            .chain(self.entity_type.fields().iter().map(|f| f.name.as_str()))
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {columns} FROM {}", self.table())
    }

    /// Runs `op` in an immediate transaction on a scoped pooled connection.
    fn write<T>(
        &self,
        event: &'static str,
        op: impl FnOnce(&Transaction<'_>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<T> {
            let mut conn = self.db.connection()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = op(&tx)?;
            tx.commit()?;
            Ok(value)
        })();
        self.log_outcome(event, started_at, &result);
        result
    }

    /// Runs `op` on a scoped pooled connection without a write transaction.
    fn query<T>(
        &self,
        event: &'static str,
        op: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let result = (|| -> RepoResult<T> {
            let conn = self.db.connection()?;
            op(&*conn)
        })();
        self.log_outcome(event, started_at, &result);
        result
    }

    fn log_outcome<T>(&self, event: &str, started_at: Instant, result: &RepoResult<T>) {
        let duration_ms = started_at.elapsed().as_millis();
        let entity_type = self.entity_type.name();
        match result {
            Ok(_) => debug!(
                "event={event} module=repo status=ok entity_type={entity_type} duration_ms={duration_ms}"
            ),
            Err(RepoError::NotFound(id)) => debug!(
                "event={event} module=repo status=not_found entity_type={entity_type} id={id} duration_ms={duration_ms}"
            ),
            Err(err) => warn!(
                "event={event} module=repo status=error entity_type={entity_type} duration_ms={duration_ms} error_code={} error={err}",
                err.code()
            ),
        }
    }

    fn select_one(&self, conn: &Connection, id: EntityId) -> RepoResult<Option<Entity>> {
        let sql = format!("{} WHERE {} = ?1;", self.select_sql(), quote_ident(ID_COLUMN));
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row([id.get()], |row| Ok(parse_entity_row(row, &self.entity_type)))
            .optional()?
            .transpose()
    }
}

impl EntityRepository for SqliteEntityStore {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn create(&self, fields: &Fields) -> RepoResult<Entity> {
        self.write("entity_create", |tx| {
            let normalized = self.entity_type.validate_create(fields)?;
            let columns = normalized
                .keys()
                .map(|name| quote_ident(name))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (1..=normalized.len())
                .map(|index| format!("?{index}"))
                .collect::<Vec<_>>()
                .join(", ");

            tx.execute(
                &format!(
                    "INSERT INTO {} ({columns}) VALUES ({placeholders});",
                    self.table()
                ),
                params_from_iter(normalized.values()),
            )?;

            let id = EntityId::new(tx.last_insert_rowid());
            self.select_one(tx, id)?.ok_or(RepoError::NotFound(id))
        })
    }

    fn read(&self, id: EntityId) -> RepoResult<Entity> {
        self.query("entity_read", |conn| {
            self.select_one(conn, id)?.ok_or(RepoError::NotFound(id))
        })
    }

    fn update(&self, id: EntityId, fields: &Fields) -> RepoResult<Entity> {
        self.write("entity_update", |tx| {
            let normalized = self.entity_type.validate_update(fields)?;
            if !normalized.is_empty() {
                let assignments = normalized
                    .keys()
                    .enumerate()
                    .map(|(index, name)| format!("{} = ?{}", quote_ident(name), index + 1))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut bind_values: Vec<Value> =
                    normalized.values().map(FieldValue::to_sql_value).collect();
                bind_values.push(Value::Integer(id.get()));

                let changed = tx.execute(
                    &format!(
                        "UPDATE {} SET {assignments} WHERE {} = ?{};",
                        self.table(),
                        quote_ident(ID_COLUMN),
                        bind_values.len()
                    ),
                    params_from_iter(bind_values),
                )?;
                if changed == 0 {
                    return Err(RepoError::NotFound(id));
                }
            }

            self.select_one(tx, id)?.ok_or(RepoError::NotFound(id))
        })
    }

    fn delete(&self, id: EntityId) -> RepoResult<bool> {
        self.write("entity_delete", |tx| {
            let changed = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1;",
                    self.table(),
                    quote_ident(ID_COLUMN)
                ),
                [id.get()],
            )?;
            Ok(changed > 0)
        })
    }

    fn fetch_page(
        &self,
        filter: &EntityFilter,
        after: Option<EntityId>,
        limit: u32,
    ) -> RepoResult<Vec<Entity>> {
        self.query("entity_fetch_page", |conn| {
            let (clauses, filter_values) = filter.to_sql(&self.entity_type)?;

            let id_column = quote_ident(ID_COLUMN);
            let mut sql = format!("{} WHERE {id_column} > ?", self.select_sql());
            let mut bind_values = vec![Value::Integer(after.map_or(0, EntityId::get))];
            for clause in clauses {
                sql.push_str(" AND ");
                sql.push_str(&clause);
            }
            bind_values.extend(filter_values);
            sql.push_str(&format!(" ORDER BY {id_column} ASC LIMIT ?;"));
            bind_values.push(Value::Integer(i64::from(limit)));

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;
            let mut entities = Vec::new();
            while let Some(row) = rows.next()? {
                entities.push(parse_entity_row(row, &self.entity_type)?);
            }
            Ok(entities)
        })
    }

    fn page_size(&self) -> u32 {
        self.db.config().page_size
    }
}

fn parse_entity_row(row: &Row<'_>, entity_type: &EntityType) -> RepoResult<Entity> {
    let id = EntityId::new(row.get(ID_COLUMN)?);

    let mut fields = Fields::new();
    for def in entity_type.fields() {
        let column = def.name.as_str();
        let value = match def.kind {
            FieldKind::Integer => row.get::<_, Option<i64>>(column)?.into(),
            FieldKind::Real => row.get::<_, Option<f64>>(column)?.into(),
            FieldKind::Text => row.get::<_, Option<String>>(column)?.into(),
            FieldKind::Bool => match row.get::<_, Option<i64>>(column)? {
                None => FieldValue::Null,
                Some(0) => FieldValue::Bool(false),
                Some(1) => FieldValue::Bool(true),
                Some(other) => {
                    return Err(RepoError::InvalidData(format!(
                        "invalid bool value `{other}` in {}.{column}",
                        entity_type.name()
                    )));
                }
            },
        };
        if def.required && value.is_null() {
            return Err(RepoError::InvalidData(format!(
                "required field {}.{column} is null",
                entity_type.name()
            )));
        }
        fields.insert(def.name.clone(), value);
    }

    Ok(Entity { id, fields })
}
