use entistore_core::{
    fields, Database, EntityFilter, EntityId, EntityRepository, EntityService, EntityType,
    ErrorKind, FieldDef, FieldError, FieldKind, FieldValue, RepoError, SqliteEntityStore,
    StoreConfig,
};
use std::time::Duration;

fn person_type() -> EntityType {
    EntityType::new(
        "person",
        vec![
            FieldDef::new("email", FieldKind::Text).required().unique(),
            FieldDef::new("name", FieldKind::Text),
            FieldDef::new("age", FieldKind::Integer),
            FieldDef::new("score", FieldKind::Real),
            FieldDef::new("active", FieldKind::Bool),
        ],
    )
    .unwrap()
}

fn person_store(db: &Database) -> SqliteEntityStore {
    SqliteEntityStore::define(db, person_type()).unwrap()
}

fn row_count(db: &Database) -> i64 {
    db.connection()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM person;", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn create_then_read_returns_identical_fields() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);

    let input = fields! {
        "email" => "ada@example.com",
        "name" => "Ada",
        "age" => 36,
        "score" => 9.5,
        "active" => true,
    };
    let created = store.create(&input).unwrap();
    assert!(created.id.get() > 0);
    assert_eq!(created.fields, input);

    let loaded = store.read(created.id).unwrap();
    assert_eq!(loaded, created);
}

#[test]
fn create_fills_omitted_fields_with_null() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);

    let created = store
        .create(&fields! { "email" => "grace@example.com" })
        .unwrap();

    assert_eq!(created.fields.len(), 5);
    assert_eq!(created.get("name"), Some(&FieldValue::Null));
    assert_eq!(created.get("active"), Some(&FieldValue::Null));
}

#[test]
fn create_widens_integers_for_real_fields() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);

    let created = store
        .create(&fields! { "email" => "x@example.com", "score" => 7 })
        .unwrap();
    assert_eq!(created.get("score"), Some(&FieldValue::Real(7.0)));
}

#[test]
fn update_then_read_reflects_updated_fields_exactly() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);

    let created = store
        .create(&fields! { "email" => "alan@example.com", "name" => "Alan", "age" => 41 })
        .unwrap();

    let updated = store
        .update(created.id, &fields! { "age" => 42, "name" => None::<String> })
        .unwrap();
    assert_eq!(updated.id, created.id);

    let loaded = store.read(created.id).unwrap();
    assert_eq!(loaded, updated);
    assert_eq!(loaded.get("age"), Some(&FieldValue::Integer(42)));
    assert_eq!(loaded.get("name"), Some(&FieldValue::Null));
    assert_eq!(
        loaded.get("email"),
        Some(&FieldValue::Text("alan@example.com".to_string()))
    );
}

#[test]
fn update_missing_entity_returns_not_found() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);

    let err = store
        .update(EntityId::new(404), &fields! { "age" => 1 })
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == EntityId::new(404)));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = store.update(EntityId::new(404), &fields! {}).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn update_cannot_touch_id() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);
    let created = store.create(&fields! { "email" => "a@b.c" }).unwrap();

    let err = store.update(created.id, &fields! { "id" => 99 }).unwrap_err();
    assert!(matches!(err, RepoError::Field(FieldError::ImmutableId)));
    assert_eq!(store.read(created.id).unwrap().id, created.id);
}

#[test]
fn delete_then_read_returns_not_found() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);
    let created = store.create(&fields! { "email" => "gone@example.com" }).unwrap();

    assert!(store.delete(created.id).unwrap());

    let err = store.read(created.id).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == created.id));
}

#[test]
fn delete_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);
    let created = store.create(&fields! { "email" => "twice@example.com" }).unwrap();

    assert!(store.delete(created.id).unwrap());
    assert!(!store.delete(created.id).unwrap());
    assert!(!store.delete(EntityId::new(12345)).unwrap());
}

#[test]
fn ids_are_not_reused_after_delete() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);

    let first = store.create(&fields! { "email" => "1@x" }).unwrap();
    store.delete(first.id).unwrap();
    let second = store.create(&fields! { "email" => "2@x" }).unwrap();

    assert!(second.id > first.id);
}

#[test]
fn unique_violation_is_a_storage_error_and_writes_nothing() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);
    store.create(&fields! { "email" => "dup@example.com" }).unwrap();

    let err = store
        .create(&fields! { "email" => "dup@example.com", "name" => "copy" })
        .unwrap_err();
    assert!(matches!(err, RepoError::Constraint(_)));
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert_eq!(row_count(&db), 1);
}

#[test]
fn failed_update_rolls_back_every_field() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);
    store.create(&fields! { "email" => "taken@example.com" }).unwrap();
    let target = store
        .create(&fields! { "email" => "mine@example.com", "age" => 20 })
        .unwrap();

    let err = store
        .update(
            target.id,
            &fields! { "age" => 21, "email" => "taken@example.com" },
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::Constraint(_)));

    let loaded = store.read(target.id).unwrap();
    assert_eq!(loaded, target);
}

#[test]
fn validation_failures_block_writes() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);

    let err = store.create(&fields! { "name" => "no email" }).unwrap_err();
    assert!(matches!(err, RepoError::Field(FieldError::RequiredNull(_))));

    let err = store
        .create(&fields! { "email" => "e@x", "age" => "old" })
        .unwrap_err();
    assert!(matches!(err, RepoError::Field(FieldError::KindMismatch { .. })));

    let err = store
        .create(&fields! { "email" => "e@x", "nickname" => "el" })
        .unwrap_err();
    assert!(matches!(err, RepoError::Field(FieldError::UnknownField { .. })));
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert_eq!(row_count(&db), 0);
}

#[test]
fn non_finite_reals_are_rejected_instead_of_stored_as_null() {
    let db = Database::open_in_memory().unwrap();
    let store = person_store(&db);

    let err = store
        .create(&fields! { "email" => "nan@x", "score" => f64::NAN })
        .unwrap_err();
    assert!(matches!(err, RepoError::Field(FieldError::NonFinite(ref field)) if field == "score"));
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert_eq!(row_count(&db), 0);

    let created = store
        .create(&fields! { "email" => "inf@x", "score" => 1.5 })
        .unwrap();
    let err = store
        .update(created.id, &fields! { "score" => f64::INFINITY })
        .unwrap_err();
    assert!(matches!(err, RepoError::Field(FieldError::NonFinite(_))));
    assert_eq!(
        store.read(created.id).unwrap().get("score"),
        Some(&FieldValue::Real(1.5))
    );

    let err = store
        .list(&EntityFilter::all().lt("score", f64::NAN))
        .iter()
        .next()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RepoError::Field(FieldError::NonFinite(_))));
}

#[test]
fn connections_return_to_pool_after_success_and_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::file(dir.path().join("pool.db")).with_pool_size(2);
    config.connection_timeout = Duration::from_secs(1);
    let db = Database::open(&config).unwrap();
    let store = person_store(&db);

    let created = store.create(&fields! { "email" => "p@x" }).unwrap();
    store.create(&fields! { "email" => "p@x" }).unwrap_err();
    store.read(EntityId::new(999)).unwrap_err();
    store.update(created.id, &fields! { "age" => "bad" }).unwrap_err();
    for entity in &store.list(&EntityFilter::all()) {
        entity.unwrap();
    }

    // Both pooled connections must be free again.
    let first = db.connection().unwrap();
    let second = db.connection().unwrap();
    drop((first, second));
}

#[test]
fn service_wraps_repository_calls() {
    let db = Database::open_in_memory().unwrap();
    let service = EntityService::new(person_store(&db));

    let created = service
        .create_entity(&fields! { "email" => "svc@example.com" })
        .unwrap();
    assert_eq!(
        service.get_entity(created.id).unwrap().map(|e| e.id),
        Some(created.id)
    );

    service.delete_entity(created.id).unwrap();
    assert!(service.get_entity(created.id).unwrap().is_none());
    assert!(service.read_entity(created.id).unwrap_err().is_not_found());
    assert_eq!(service.count_entities(&EntityFilter::all()).unwrap(), 0);
}
