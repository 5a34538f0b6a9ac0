//! Subcommand implementations.

use clap::Args;
use entistore_core::{
    fields, list_entity_types, Comparison, Condition, Database, Entity, EntityFilter, EntityId,
    EntityRepository, EntityService, EntityType, FieldDef, FieldKind, FieldValue, Fields,
    RepoResult, SqliteEntityStore,
};
use log::info;
use std::error::Error;
use std::thread;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Args)]
pub struct DefineArgs {
    pub entity_type: String,

    /// Field declarations, e.g. `email:text:required:unique`
    #[arg(required = true)]
    pub fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    pub entity_type: String,

    /// `field=value` pairs; `null` clears a field
    pub assignments: Vec<String>,
}

#[derive(Debug, Args)]
pub struct IdArgs {
    pub entity_type: String,
    pub id: i64,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    pub entity_type: String,
    pub id: i64,

    /// `field=value` pairs; `null` clears a field
    pub assignments: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    pub entity_type: String,

    /// Condition such as `age>=18` or `name=ada`; repeat to AND them
    #[arg(long = "where")]
    pub conditions: Vec<String>,

    #[arg(long)]
    pub limit: Option<u32>,
}

/// Defines `test { key, value }`, stores a greeting under key 1 on a worker
/// thread and prints it back.
pub fn hello(db: &Database) -> CliResult {
    let db = db.clone();
    let worker = thread::spawn(move || persistent_hello_world(&db));
    let greeting = worker
        .join()
        .map_err(|_| "hello worker panicked")??;

    println!("{greeting}");
    Ok(())
}

fn persistent_hello_world(db: &Database) -> RepoResult<String> {
    let entity_type = EntityType::new(
        "test",
        vec![
            FieldDef::new("key", FieldKind::Integer).required().unique(),
            FieldDef::new("value", FieldKind::Text),
        ],
    )?;
    let service = EntityService::new(SqliteEntityStore::define(db, entity_type)?);
    let by_key = EntityFilter::all().eq("key", 1).limit(1);

    // File databases keep the row from earlier runs.
    if service.count_entities(&by_key)? == 0 {
        service.create_entity(&fields! { "key" => 1, "value" => "Hello world!" })?;
    }

    let greeting = service
        .collect_entities(&by_key)?
        .into_iter()
        .next()
        .and_then(|entity| entity.get("value").and_then(FieldValue::as_text).map(str::to_string))
        .unwrap_or_default();

    info!("event=hello module=cli status=ok value={greeting}");
    Ok(greeting)
}

pub fn define(db: &Database, args: DefineArgs) -> CliResult {
    let fields = args
        .fields
        .iter()
        .map(|spec| FieldDef::parse(spec))
        .collect::<Result<Vec<_>, _>>()?;
    let entity_type = EntityType::new(args.entity_type, fields)?;

    let store = SqliteEntityStore::define(db, entity_type)?;
    println!("{}", serde_json::to_string(store.entity_type())?);
    Ok(())
}

pub fn types(db: &Database) -> CliResult {
    for entity_type in list_entity_types(db)? {
        println!("{}", serde_json::to_string(&entity_type)?);
    }
    Ok(())
}

pub fn create(db: &Database, args: WriteArgs) -> CliResult {
    let service = open_service(db, &args.entity_type)?;
    let fields = parse_assignments(service.entity_type(), &args.assignments)?;
    print_entity(&service.create_entity(&fields)?)
}

pub fn get(db: &Database, args: IdArgs) -> CliResult {
    let service = open_service(db, &args.entity_type)?;
    print_entity(&service.read_entity(EntityId::new(args.id))?)
}

pub fn update(db: &Database, args: UpdateArgs) -> CliResult {
    let service = open_service(db, &args.entity_type)?;
    let fields = parse_assignments(service.entity_type(), &args.assignments)?;
    print_entity(&service.update_entity(EntityId::new(args.id), &fields)?)
}

pub fn delete(db: &Database, args: IdArgs) -> CliResult {
    let service = open_service(db, &args.entity_type)?;
    let removed = service.delete_entity(EntityId::new(args.id))?;
    println!("{}", serde_json::json!({ "id": args.id, "removed": removed }));
    Ok(())
}

pub fn list(db: &Database, args: ListArgs) -> CliResult {
    let service = open_service(db, &args.entity_type)?;

    let mut filter = EntityFilter::all();
    for expr in &args.conditions {
        let condition = parse_condition(service.entity_type(), expr)?;
        filter = filter.with(condition.field, condition.op, condition.value);
    }
    if let Some(limit) = args.limit {
        filter = filter.limit(limit);
    }

    for entity in &service.list_entities(&filter) {
        print_entity(&entity?)?;
    }
    Ok(())
}

fn open_service(db: &Database, name: &str) -> RepoResult<EntityService<SqliteEntityStore>> {
    Ok(EntityService::new(SqliteEntityStore::open(db, name)?))
}

fn print_entity(entity: &Entity) -> CliResult {
    println!("{}", serde_json::to_string(entity)?);
    Ok(())
}

fn field_kind(entity_type: &EntityType, field: &str) -> Result<FieldKind, String> {
    if field == "id" {
        return Ok(FieldKind::Integer);
    }
    entity_type
        .field(field)
        .map(|def| def.kind)
        .ok_or_else(|| format!("entity type `{}` has no field `{field}`", entity_type.name()))
}

fn parse_value(kind: FieldKind, field: &str, raw: &str) -> Result<FieldValue, String> {
    kind.parse_value(raw)
        .ok_or_else(|| format!("`{raw}` is not a valid {kind} value for `{field}`"))
}

fn parse_assignments(entity_type: &EntityType, assignments: &[String]) -> Result<Fields, String> {
    let mut fields = Fields::new();
    for assignment in assignments {
        let (field, raw) = assignment
            .split_once('=')
            .ok_or_else(|| format!("expected field=value, got `{assignment}`"))?;
        let field = field.trim();
        let value = parse_value(field_kind(entity_type, field)?, field, raw)?;
        fields.insert(field.to_string(), value);
    }
    Ok(fields)
}

fn parse_condition(entity_type: &EntityType, expr: &str) -> Result<Condition, String> {
    let start = expr
        .find(['<', '>', '!', '='])
        .ok_or_else(|| format!("missing comparison operator in `{expr}`"))?;
    let rest = &expr[start..];
    let (token, op) = Comparison::TOKENS
        .iter()
        .find(|(token, _)| rest.starts_with(*token))
        .copied()
        .ok_or_else(|| format!("unknown comparison operator in `{expr}`"))?;

    let field = expr[..start].trim();
    let value = parse_value(field_kind(entity_type, field)?, field, &rest[token.len()..])?;
    Ok(Condition {
        field: field.to_string(),
        op,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_assignments, parse_condition, persistent_hello_world};
    use entistore_core::{Comparison, Database, EntityType, FieldDef, FieldKind, FieldValue};

    fn person() -> EntityType {
        EntityType::new(
            "person",
            vec![
                FieldDef::new("name", FieldKind::Text),
                FieldDef::new("age", FieldKind::Integer),
            ],
        )
        .unwrap()
    }

    #[test]
    fn parse_condition_picks_two_char_operators() {
        let condition = parse_condition(&person(), "age>=18").unwrap();
        assert_eq!(condition.field, "age");
        assert_eq!(condition.op, Comparison::Ge);
        assert_eq!(condition.value, FieldValue::Integer(18));

        let condition = parse_condition(&person(), "name!=null").unwrap();
        assert_eq!(condition.op, Comparison::Ne);
        assert_eq!(condition.value, FieldValue::Null);

        let condition = parse_condition(&person(), "id<3").unwrap();
        assert_eq!(condition.op, Comparison::Lt);
    }

    #[test]
    fn parse_condition_rejects_bad_input() {
        assert!(parse_condition(&person(), "age").is_err());
        assert!(parse_condition(&person(), "height>3").is_err());
        assert!(parse_condition(&person(), "age>old").is_err());
    }

    #[test]
    fn parse_assignments_keeps_equals_in_text_values() {
        let fields =
            parse_assignments(&person(), &["name=a=b".to_string(), "age=null".to_string()])
                .unwrap();
        assert_eq!(fields["name"], FieldValue::Text("a=b".to_string()));
        assert_eq!(fields["age"], FieldValue::Null);

        assert!(parse_assignments(&person(), &["name".to_string()]).is_err());
    }

    #[test]
    fn hello_world_is_stored_once_and_read_back() {
        let db = Database::open_in_memory().unwrap();

        assert_eq!(persistent_hello_world(&db).unwrap(), "Hello world!");
        assert_eq!(persistent_hello_world(&db).unwrap(), "Hello world!");

        let rows: i64 = db
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM test;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
