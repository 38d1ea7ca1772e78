//! Integration tests for the migration engine.

use std::sync::Arc;

use gridorm_core::migration::LEDGER_TABLE;
use gridorm_core::{
    Backend, FieldDef, FieldType, IndexDef, Migration, MigrationError, MigrationExecutor,
    MigrationManager, ModelSchema, RetryPolicy, SchemaUpdate, SledStore, StoreConfig,
};

fn users() -> ModelSchema {
    ModelSchema::builder("users")
        .with_field(FieldDef::new("id", FieldType::String).primary_key())
        .with_field(FieldDef::new("name", FieldType::String))
        .build()
        .unwrap()
}

/// Write a three-step chain into `dir`, deliberately out of name order.
fn write_chain(dir: &std::path::Path) {
    let steps = [
        Migration::new("0a1", None, "create users")
            .with_upgrade(SchemaUpdate::CreateTable { table: users() })
            .with_downgrade(SchemaUpdate::DropTable {
                table: "users".into(),
            }),
        Migration::new("ff2", Some("0a1".into()), "add email")
            .with_upgrade(SchemaUpdate::AddColumn {
                table: "users".into(),
                field: FieldDef::nullable("email", FieldType::String),
            })
            .with_downgrade(SchemaUpdate::DropColumn {
                table: "users".into(),
                column: "email".into(),
            }),
        Migration::new("123", Some("ff2".into()), "index email")
            .with_upgrade(SchemaUpdate::CreateIndex {
                table: "users".into(),
                index: IndexDef::new("users_by_email", ["email"]),
            })
            .with_downgrade(SchemaUpdate::DropIndex {
                table: "users".into(),
                index: "users_by_email".into(),
            }),
    ];
    for (n, migration) in steps.iter().enumerate() {
        let name = format!("step{}", n);
        migration
            .save(&dir.join(Migration::file_name(&name, &migration.id)))
            .unwrap();
    }
}

#[test]
fn test_migrate_then_rollback_restores_schema_and_ledger() {
    let dir = tempfile::tempdir().unwrap();
    write_chain(dir.path());
    let store: Arc<SledStore> = Arc::new(SledStore::temporary().unwrap());

    let manager = MigrationManager::load(dir.path()).unwrap();
    let ids: Vec<&str> = manager.migrations().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["0a1", "ff2", "123"]);

    let executor = MigrationExecutor::new(manager, store.clone(), RetryPolicy::default()).unwrap();
    assert_eq!(executor.migrate(Some("ff2")).unwrap(), vec!["0a1", "ff2"]);
    let before = store.database_schema().unwrap();

    assert_eq!(executor.migrate(None).unwrap(), vec!["123"]);
    assert!(store.database_schema().unwrap().find_index("users_by_email").is_some());

    assert_eq!(executor.rollback("123").unwrap(), vec!["123"]);
    assert_eq!(store.database_schema().unwrap(), before);
    assert_eq!(
        executor.show_migrations().unwrap(),
        vec!["[ ] 123, index email", "[X] ff2, add email", "[X] 0a1, create users"]
    );

    assert_eq!(executor.rollback("0a1").unwrap(), vec!["ff2", "0a1"]);
    let schema = store.database_schema().unwrap();
    assert!(!schema.contains("users"));
    assert!(schema.contains(LEDGER_TABLE));
    assert!(executor.status().unwrap().iter().all(|(_, migrated)| !migrated));
}

#[test]
fn test_ledger_survives_reopen() {
    let data = tempfile::tempdir().unwrap();
    let migrations = tempfile::tempdir().unwrap();
    write_chain(migrations.path());

    {
        let store = Arc::new(SledStore::open(StoreConfig::new(data.path())).unwrap());
        let manager = MigrationManager::load(migrations.path()).unwrap();
        let executor = MigrationExecutor::new(manager, store.clone(), RetryPolicy::default()).unwrap();
        executor.migrate(Some("0a1")).unwrap();
        store.flush().unwrap();
    }

    let store = Arc::new(SledStore::open(StoreConfig::new(data.path())).unwrap());
    let manager = MigrationManager::load(migrations.path()).unwrap();
    let executor = MigrationExecutor::new(manager, store, RetryPolicy::default()).unwrap();
    assert_eq!(executor.migrate(None).unwrap(), vec!["ff2", "123"]);
}

#[test]
fn test_broken_chain_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_chain(dir.path());
    Migration::new("dup", Some("0a1".into()), "fork")
        .save(&dir.path().join("fork_dup.json"))
        .unwrap();

    let result = MigrationManager::load(dir.path());
    assert!(matches!(result, Err(MigrationError::Chain(_))));
}

#[test]
fn test_generated_migration_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    write_chain(dir.path());
    let mut manager = MigrationManager::load(dir.path()).unwrap();
    let path = manager.generate("noop").unwrap();

    let generated = Migration::load(&path).unwrap();
    assert_eq!(generated.prev_id.as_deref(), Some("123"));

    let store = Arc::new(SledStore::temporary().unwrap());
    let manager = MigrationManager::load(dir.path()).unwrap();
    let executor = MigrationExecutor::new(manager, store, RetryPolicy::default()).unwrap();
    let applied = executor.migrate(None).unwrap();
    assert_eq!(applied.len(), 4);
    assert_eq!(applied[3], generated.id);
}
