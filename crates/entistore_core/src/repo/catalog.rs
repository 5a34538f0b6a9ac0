//! Entity type catalog.
//!
//! # Responsibility
//! - Persist entity type definitions in `entity_types`.
//! - Create one table per entity type and verify it on reopen.
//!
//! # Invariants
//! - A catalog row and its table are created in the same transaction.
//! - A stored definition is never silently replaced by a different one.

use crate::db::Database;
use crate::model::schema::{quote_ident, EntityType, FieldDef, FieldKind, ID_COLUMN};
use crate::repo::entity_repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// Registers `entity_type` and creates its table when it is new.
///
/// Returns the stored definition and whether it was created by this call.
/// Type names match case-insensitively, so an existing definition keeps its
/// original spelling.
pub(crate) fn register(
    tx: &Transaction<'_>,
    entity_type: EntityType,
) -> RepoResult<(EntityType, bool)> {
    entity_type.check()?;

    if let Some(existing) = load(tx, entity_type.name())? {
        if existing.fields() != entity_type.fields() {
            return Err(RepoError::SchemaMismatch {
                entity_type: existing.name().to_string(),
            });
        }
        ensure_table_ready(tx, &existing)?;
        return Ok((existing, false));
    }

    let fields_json = serde_json::to_string(entity_type.fields())
        .map_err(|err| RepoError::InvalidData(format!("cannot encode field definitions: {err}")))?;
    tx.execute(
        "INSERT INTO entity_types (name, fields_json) VALUES (?1, ?2);",
        params![entity_type.name(), fields_json],
    )?;
    tx.execute_batch(&create_table_sql(&entity_type))?;
    Ok((entity_type, true))
}

/// Loads one definition by name (case-insensitive).
pub(crate) fn load(conn: &Connection, name: &str) -> RepoResult<Option<EntityType>> {
    let row = conn
        .query_row(
            "SELECT name, fields_json FROM entity_types WHERE name = ?1;",
            [name],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    row.map(|(name, fields_json)| decode(name, &fields_json))
        .transpose()
}

/// Lists every registered entity type ordered by name.
pub fn list_entity_types(db: &Database) -> RepoResult<Vec<EntityType>> {
    let conn = db.connection()?;
    let mut stmt =
        conn.prepare("SELECT name, fields_json FROM entity_types ORDER BY name COLLATE NOCASE;")?;
    let mut rows = stmt.query([])?;
    let mut types = Vec::new();
    while let Some(row) = rows.next()? {
        let fields_json: String = row.get("fields_json")?;
        types.push(decode(row.get("name")?, &fields_json)?);
    }
    Ok(types)
}

/// Checks that the table backing `entity_type` has every expected column.
pub(crate) fn ensure_table_ready(conn: &Connection, entity_type: &EntityType) -> RepoResult<()> {
    if !table_exists(conn, entity_type.name())? {
        return Err(RepoError::MissingRequiredTable(
            entity_type.name().to_string(),
        ));
    }

    let columns = std::iter::once(ID_COLUMN).chain(
        entity_type
            .fields()
            .iter()
            .map(|field| field.name.as_str()),
    );
    for column in columns {
        if !table_has_column(conn, entity_type.name(), column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: entity_type.name().to_string(),
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

fn decode(name: String, fields_json: &str) -> RepoResult<EntityType> {
    let fields: Vec<FieldDef> = serde_json::from_str(fields_json).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid field definitions for `{name}` in entity_types.fields_json: {err}"
        ))
    })?;
    EntityType::new(name, fields).map_err(|err| {
        RepoError::InvalidData(format!("invalid entity type in entity_types: {err}"))
    })
}

fn create_table_sql(entity_type: &EntityType) -> String {
    let mut columns = vec![format!(
        "{} INTEGER PRIMARY KEY AUTOINCREMENT",
        quote_ident(ID_COLUMN)
    )];
    for field in entity_type.fields() {
        let name = quote_ident(&field.name);
        let mut column = format!("{name} {}", field.kind.sql_type());
        if field.required {
            column.push_str(" NOT NULL");
        }
        if field.unique {
            column.push_str(" UNIQUE");
        }
        if field.kind == FieldKind::Bool {
            column.push_str(&format!(" CHECK ({name} IN (0, 1))"));
        }
        columns.push(column);
    }

    format!(
        "CREATE TABLE {} (\n    {}\n);",
        quote_ident(entity_type.name()),
        columns.join(",\n    ")
    )
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1 COLLATE NOCASE
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}
