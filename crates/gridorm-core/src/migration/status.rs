//! Migration ledger: which migrations have been applied.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::catalog::{FieldDef, FieldType, ModelSchema};
use crate::condition::ReadRequest;
use crate::error::Error;
use crate::query::FilterEvaluator;
use crate::storage::{Backend, Row};
use crate::transaction::{Mutation, TransactionRunner};
use crate::value::Value;

use super::update::SchemaUpdate;

/// Table holding the ledger.
pub const LEDGER_TABLE: &str = "gridorm_migrations";

/// Schema of the ledger table.
pub fn ledger_schema() -> Result<ModelSchema, Error> {
    ModelSchema::builder(LEDGER_TABLE)
        .with_field(FieldDef::new("id", FieldType::String).primary_key())
        .with_field(FieldDef::new("migrated", FieldType::Bool))
        .with_field(FieldDef::new("update_time", FieldType::Timestamp))
        .build()
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Migration id.
    pub id: String,
    /// Whether the migration is applied.
    pub migrated: bool,
    /// When the entry was last written.
    pub update_time: DateTime<Utc>,
}

impl MigrationRecord {
    fn from_row(row: &Row) -> Result<Self, Error> {
        let field = |name: &str| {
            FilterEvaluator::get_field_value(row, name)
                .cloned()
                .unwrap_or(Value::Null)
        };
        let malformed = |name: &str| Error::Deserialization(format!("ledger column '{}' is malformed", name));

        Ok(Self {
            id: field("id").as_str().ok_or_else(|| malformed("id"))?.to_string(),
            migrated: field("migrated").as_bool().ok_or_else(|| malformed("migrated"))?,
            update_time: field("update_time")
                .as_datetime()
                .ok_or_else(|| malformed("update_time"))?,
        })
    }
}

/// Reads and writes the ledger table through the regular row primitives.
///
/// The ledger lives in the same database as the migrated schema, but ledger
/// writes and schema changes are separate operations.
pub struct Ledger {
    runner: TransactionRunner,
    schema: Arc<ModelSchema>,
}

impl Ledger {
    /// Open the ledger, creating its table if it does not exist.
    pub fn open(runner: TransactionRunner) -> Result<Self, Error> {
        let schema = Arc::new(ledger_schema()?);
        if !runner.backend().database_schema()?.contains(LEDGER_TABLE) {
            runner.backend().apply_schema_change(&SchemaUpdate::CreateTable {
                table: (*schema).clone(),
            })?;
            info!(table = LEDGER_TABLE, "created migration ledger");
        }
        Ok(Self { runner, schema })
    }

    fn backend(&self) -> &dyn Backend {
        self.runner.backend().as_ref()
    }

    /// Every ledger entry, keyed by migration id.
    pub fn records(&self) -> Result<BTreeMap<String, MigrationRecord>, Error> {
        let request = ReadRequest::scan(&self.schema);
        let rows = self
            .runner
            .run_read_only(|txn| self.backend().execute_query(txn, &request))?;
        rows.iter()
            .map(|row| MigrationRecord::from_row(row).map(|r| (r.id.clone(), r)))
            .collect()
    }

    /// Whether `id` is recorded as applied.
    pub fn is_migrated(&self, id: &str) -> Result<bool, Error> {
        Ok(self.records()?.get(id).is_some_and(|r| r.migrated))
    }

    /// Record `id` as applied.
    pub fn mark_migrated(&self, id: &str) -> Result<(), Error> {
        let key = vec![Value::from(id)];
        let values = vec![
            ("id".to_string(), Value::from(id)),
            ("migrated".to_string(), Value::Bool(true)),
            ("update_time".to_string(), Value::from(Utc::now())),
        ];
        self.runner.run_write(|txn| {
            self.backend().execute_dml(
                txn,
                Mutation::Upsert {
                    table: LEDGER_TABLE.to_string(),
                    key: key.clone(),
                    values: values.clone(),
                },
            )
        })
    }

    /// Remove the entry for `id`.
    pub fn remove(&self, id: &str) -> Result<(), Error> {
        let key = vec![Value::from(id)];
        self.runner.run_write(|txn| {
            self.backend().execute_dml(
                txn,
                Mutation::Delete {
                    table: LEDGER_TABLE.to_string(),
                    key: key.clone(),
                },
            )
        })
    }
}
