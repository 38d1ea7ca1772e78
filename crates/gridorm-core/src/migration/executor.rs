//! Applying and rolling back migrations.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::error::MigrationError;
use super::manager::MigrationManager;
use super::migration::Migration;
use super::status::Ledger;
use crate::config::RetryPolicy;
use crate::storage::Backend;
use crate::transaction::TransactionRunner;

/// Applies migrations to a database and keeps the ledger in step.
///
/// Each step runs the schema update and then writes the ledger, as two
/// separate operations. If the ledger write fails the step reports
/// [`MigrationError::LedgerOutOfSync`] and the caller has to reconcile.
/// Nothing prevents two executors from running against the same database at
/// once; doing so is unsupported.
pub struct MigrationExecutor {
    manager: MigrationManager,
    backend: Arc<dyn Backend>,
    ledger: Ledger,
}

impl MigrationExecutor {
    /// Create an executor, creating the ledger table if needed.
    pub fn new(
        manager: MigrationManager,
        backend: Arc<dyn Backend>,
        policy: RetryPolicy,
    ) -> Result<Self, MigrationError> {
        let ledger = Ledger::open(TransactionRunner::new(backend.clone(), policy))?;
        Ok(Self {
            manager,
            backend,
            ledger,
        })
    }

    /// The loaded migrations.
    pub fn manager(&self) -> &MigrationManager {
        &self.manager
    }

    /// Apply pending migrations in order, stopping after `target` if given.
    ///
    /// Returns the ids of the migrations applied.
    pub fn migrate(&self, target: Option<&str>) -> Result<Vec<String>, MigrationError> {
        let status = self.migration_status()?;
        self.validate(&status)?;

        let pending = self.select(self.manager.migrations().iter(), &status, false, target)?;
        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            info!(id = %migration.id, description = %migration.description, "applying migration");
            self.backend
                .apply_schema_change(&migration.upgrade)
                .map_err(|source| MigrationError::Update {
                    id: migration.id.clone(),
                    source,
                })?;
            self.ledger
                .mark_migrated(&migration.id)
                .map_err(|source| MigrationError::LedgerOutOfSync {
                    id: migration.id.clone(),
                    source,
                })?;
            applied.push(migration.id.clone());
        }

        info!(count = applied.len(), "migrate finished");
        Ok(applied)
    }

    /// Roll back applied migrations from the most recent one down to and
    /// including `target`.
    ///
    /// Returns the ids of the migrations rolled back.
    pub fn rollback(&self, target: &str) -> Result<Vec<String>, MigrationError> {
        let status = self.migration_status()?;
        self.validate(&status)?;

        let applied = self.select(self.manager.migrations().iter().rev(), &status, true, Some(target))?;
        let mut rolled_back = Vec::with_capacity(applied.len());
        for migration in applied {
            info!(id = %migration.id, description = %migration.description, "rolling back migration");
            self.backend
                .apply_schema_change(&migration.downgrade)
                .map_err(|source| MigrationError::Update {
                    id: migration.id.clone(),
                    source,
                })?;
            self.ledger
                .remove(&migration.id)
                .map_err(|source| MigrationError::LedgerOutOfSync {
                    id: migration.id.clone(),
                    source,
                })?;
            rolled_back.push(migration.id.clone());
        }

        info!(count = rolled_back.len(), "rollback finished");
        Ok(rolled_back)
    }

    /// Every migration in application order with its applied flag.
    pub fn status(&self) -> Result<Vec<(&Migration, bool)>, MigrationError> {
        let status = self.migration_status()?;
        Ok(self
            .manager
            .migrations()
            .iter()
            .map(|m| (m, is_migrated(&status, Some(&m.id))))
            .collect())
    }

    /// One line per migration, most recent first: `[X] id, description`.
    pub fn show_migrations(&self) -> Result<Vec<String>, MigrationError> {
        let status = self.migration_status()?;
        self.validate(&status)?;
        Ok(self
            .status()?
            .into_iter()
            .rev()
            .map(|(m, migrated)| {
                format!("[{}] {}, {}", if migrated { "X" } else { " " }, m.id, m.description)
            })
            .collect())
    }

    fn migration_status(&self) -> Result<BTreeMap<String, bool>, MigrationError> {
        Ok(self
            .ledger
            .records()?
            .into_iter()
            .map(|(id, record)| (id, record.migrated))
            .collect())
    }

    /// An applied migration must never depend on an unapplied one.
    fn validate(&self, status: &BTreeMap<String, bool>) -> Result<(), MigrationError> {
        let migrations = self.manager.migrations();
        let Some(first) = migrations.first() else {
            return Ok(());
        };
        if !is_migrated(status, first.prev_id.as_deref()) {
            return Err(MigrationError::Chain(format!(
                "first migration {} depends on unmigrated migration {}",
                first.id,
                first.prev_id.as_deref().unwrap_or_default()
            )));
        }
        for migration in migrations {
            if is_migrated(status, Some(&migration.id))
                && !is_migrated(status, migration.prev_id.as_deref())
            {
                return Err(MigrationError::Chain(format!(
                    "migrated migration {} depends on an unmigrated migration",
                    migration.id
                )));
            }
        }
        Ok(())
    }

    /// Migrations from `migrations` whose status is `migrated`, stopping after
    /// `target`.
    fn select<'m>(
        &self,
        migrations: impl Iterator<Item = &'m Migration>,
        status: &BTreeMap<String, bool>,
        migrated: bool,
        target: Option<&str>,
    ) -> Result<Vec<&'m Migration>, MigrationError> {
        let mut selected = Vec::new();
        let mut found = false;
        for migration in migrations {
            if is_migrated(status, Some(&migration.id)) != migrated {
                continue;
            }
            selected.push(migration);
            if target == Some(migration.id.as_str()) {
                found = true;
                break;
            }
        }

        match target {
            Some(id) if !found => {
                if self.manager.get(id).is_some() {
                    Err(MigrationError::AlreadyInState {
                        id: id.to_string(),
                        state: if migrated { "unmigrated" } else { "migrated" },
                    })
                } else {
                    Err(MigrationError::NotFound(id.to_string()))
                }
            }
            _ => Ok(selected),
        }
    }
}

fn is_migrated(status: &BTreeMap<String, bool>, id: Option<&str>) -> bool {
    match id {
        None => true,
        Some(id) => status.get(id).copied().unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::catalog::{FieldDef, FieldType, ModelSchema};
    use crate::condition::ReadRequest;
    use crate::error::Error;
    use crate::migration::SchemaUpdate;
    use crate::storage::{DatabaseSchema, Row, SledStore};
    use crate::transaction::{Mutation, Transaction};

    /// Store whose commits fail while `fail_commits` is set. Schema changes
    /// still go through.
    struct LedgerFailingStore {
        inner: SledStore,
        fail_commits: AtomicBool,
    }

    impl LedgerFailingStore {
        fn new() -> Self {
            Self {
                inner: SledStore::temporary().unwrap(),
                fail_commits: AtomicBool::new(false),
            }
        }

        fn fail_commits(&self, fail: bool) {
            self.fail_commits.store(fail, Ordering::SeqCst);
        }
    }

    impl Backend for LedgerFailingStore {
        fn begin_read_only(&self) -> Result<Transaction, Error> {
            self.inner.begin_read_only()
        }

        fn begin_read_write(&self) -> Result<Transaction, Error> {
            self.inner.begin_read_write()
        }

        fn execute_query(&self, txn: &mut Transaction, request: &ReadRequest) -> Result<Vec<Row>, Error> {
            self.inner.execute_query(txn, request)
        }

        fn execute_dml(&self, txn: &mut Transaction, mutation: Mutation) -> Result<(), Error> {
            self.inner.execute_dml(txn, mutation)
        }

        fn commit(&self, txn: Transaction) -> Result<(), Error> {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(Error::Transaction("commit unavailable".into()));
            }
            self.inner.commit(txn)
        }

        fn apply_schema_change(&self, update: &SchemaUpdate) -> Result<(), Error> {
            self.inner.apply_schema_change(update)
        }

        fn database_schema(&self) -> Result<DatabaseSchema, Error> {
            self.inner.database_schema()
        }
    }

    fn table() -> ModelSchema {
        ModelSchema::builder("users")
            .with_field(FieldDef::new("id", FieldType::String).primary_key())
            .build()
            .unwrap()
    }

    fn migrations() -> Vec<Migration> {
        vec![
            Migration::new("m1", None, "create users")
                .with_upgrade(SchemaUpdate::CreateTable { table: table() })
                .with_downgrade(SchemaUpdate::DropTable {
                    table: "users".into(),
                }),
            Migration::new("m2", Some("m1".into()), "add email")
                .with_upgrade(SchemaUpdate::AddColumn {
                    table: "users".into(),
                    field: FieldDef::nullable("email", FieldType::String),
                })
                .with_downgrade(SchemaUpdate::DropColumn {
                    table: "users".into(),
                    column: "email".into(),
                }),
        ]
    }

    fn executor() -> (Arc<SledStore>, MigrationExecutor) {
        let store = Arc::new(SledStore::temporary().unwrap());
        let manager = MigrationManager::from_migrations("unused", migrations()).unwrap();
        let executor = MigrationExecutor::new(manager, store.clone(), RetryPolicy::default()).unwrap();
        (store, executor)
    }

    #[test]
    fn test_migrate_to_target() {
        let (store, executor) = executor();
        assert_eq!(executor.migrate(Some("m1")).unwrap(), vec!["m1"]);
        let schema = store.database_schema().unwrap();
        assert!(schema.table("users").unwrap().field("email").is_none());

        assert_eq!(executor.migrate(None).unwrap(), vec!["m2"]);
        assert!(executor.migrate(None).unwrap().is_empty());
    }

    #[test]
    fn test_target_already_applied() {
        let (_, executor) = executor();
        executor.migrate(None).unwrap();
        assert!(matches!(
            executor.migrate(Some("m1")),
            Err(MigrationError::AlreadyInState { .. })
        ));
        assert!(matches!(
            executor.rollback("nope"),
            Err(MigrationError::NotFound(_))
        ));
    }

    #[test]
    fn test_failed_update_is_not_recorded() {
        let store = Arc::new(SledStore::temporary().unwrap());
        let bad = vec![Migration::new("m1", None, "bad").with_upgrade(SchemaUpdate::DropTable {
            table: "missing".into(),
        })];
        let manager = MigrationManager::from_migrations("unused", bad).unwrap();
        let executor = MigrationExecutor::new(manager, store, RetryPolicy::default()).unwrap();

        assert!(matches!(
            executor.migrate(None),
            Err(MigrationError::Update { .. })
        ));
        assert_eq!(executor.show_migrations().unwrap(), vec!["[ ] m1, bad"]);
    }

    #[test]
    fn test_ledger_failure_after_upgrade() {
        let store = Arc::new(LedgerFailingStore::new());
        let manager = MigrationManager::from_migrations("unused", migrations()).unwrap();
        let executor = MigrationExecutor::new(manager, store.clone(), RetryPolicy::default()).unwrap();

        store.fail_commits(true);
        let err = executor.migrate(None).unwrap_err();
        assert!(matches!(&err, MigrationError::LedgerOutOfSync { id, .. } if id == "m1"));
        store.fail_commits(false);

        // The table exists but the ledger does not know about it.
        assert!(store.database_schema().unwrap().contains("users"));
        assert!(executor.ledger.records().unwrap().is_empty());
        assert_eq!(
            executor.show_migrations().unwrap(),
            vec!["[ ] m2, add email", "[ ] m1, create users"]
        );
    }

    #[test]
    fn test_ledger_failure_after_downgrade() {
        let store = Arc::new(LedgerFailingStore::new());
        let manager = MigrationManager::from_migrations("unused", migrations()).unwrap();
        let executor = MigrationExecutor::new(manager, store.clone(), RetryPolicy::default()).unwrap();
        executor.migrate(Some("m1")).unwrap();

        store.fail_commits(true);
        let err = executor.rollback("m1").unwrap_err();
        assert!(matches!(&err, MigrationError::LedgerOutOfSync { id, .. } if id == "m1"));
        store.fail_commits(false);

        // The table is gone but the ledger still records it as applied.
        assert!(!store.database_schema().unwrap().contains("users"));
        assert!(executor.ledger.is_migrated("m1").unwrap());
    }

    #[test]
    fn test_show_migrations() {
        let (_, executor) = executor();
        executor.migrate(Some("m1")).unwrap();
        assert_eq!(
            executor.show_migrations().unwrap(),
            vec!["[ ] m2, add email", "[X] m1, create users"]
        );
    }
}
