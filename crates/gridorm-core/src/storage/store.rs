//! sled-backed store.
//!
//! All rows live in one tree keyed by `table \0 encoded-primary-key`, so a
//! commit touching several tables is a single sled transaction. Conflict
//! detection is optimistic: every row carries the commit sequence number that
//! last wrote it, every table carries the sequence number of its last write,
//! and commit re-checks what the transaction read.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use super::backend::{Backend, Row};
use super::key::{current_timestamp, encode_key, row_key, table_prefix};
use super::record::StoredRow;
use super::schema::DatabaseSchema;
use crate::catalog::ModelSchema;
use crate::condition::{ComparisonOp, Predicate, ReadRequest};
use crate::config::StoreConfig;
use crate::error::Error;
use crate::migration::SchemaUpdate;
use crate::query::FilterEvaluator;
use crate::transaction::{Mutation, Transaction, TransactionMode};
use crate::value::{Key, Value};

/// Tree name for row data.
const ROWS_TREE: &str = "data:rows";

/// Tree name for metadata (schema, commit sequence, table versions).
const META_TREE: &str = "meta";

/// Meta key holding the serialized database schema.
const SCHEMA_KEY: &[u8] = b"schema";

/// Meta key holding the last commit sequence number.
const COMMIT_SEQ_KEY: &[u8] = b"commit_seq";

/// Prefix for per-table version entries in the meta tree.
const TABLE_VERSION_PREFIX: &[u8] = b"table_version:";

enum PreparedOp {
    Insert(Row),
    Update(Row),
    Upsert(Row),
    Delete,
}

struct PreparedWrite {
    table: String,
    storage_key: Vec<u8>,
    op: PreparedOp,
}

/// A [`Backend`] storing rows in a local sled database.
pub struct SledStore {
    db: Db,
    rows: Tree,
    meta: Tree,
    schema: RwLock<DatabaseSchema>,
    /// Serializes commits and schema changes.
    commit_lock: Mutex<()>,
    next_txn_id: AtomicU64,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let rows = db.open_tree(ROWS_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        let schema = match meta.get(SCHEMA_KEY)? {
            Some(bytes) => DatabaseSchema::from_bytes(&bytes)?,
            None => DatabaseSchema::default(),
        };
        debug!(
            path = %config.path.display(),
            tables = schema.tables().count(),
            "opened sled store"
        );

        Ok(Self {
            db,
            rows,
            meta,
            schema: RwLock::new(schema),
            commit_lock: Mutex::new(()),
            next_txn_id: AtomicU64::new(1),
        })
    }

    /// Open a temporary in-memory store.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(StoreConfig::temporary())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    fn begin(&self, mode: TransactionMode) -> Transaction {
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        debug!(txn = id, %mode, "begin transaction");
        Transaction::new(id, mode)
    }

    fn read_u64(&self, key: &[u8]) -> Result<u64, Error> {
        Ok(self.meta.get(key)?.map(|bytes| decode_u64(&bytes)).unwrap_or(0))
    }

    fn table_version(&self, table: &str) -> Result<u64, Error> {
        self.read_u64(&table_version_key(table))
    }

    fn row_version(&self, storage_key: &[u8]) -> Result<u64, Error> {
        match self.rows.get(storage_key)? {
            Some(bytes) => Ok(StoredRow::from_bytes(&bytes)?.version),
            None => Ok(0),
        }
    }

    /// Check that nothing the transaction read has changed since.
    fn validate_reads(&self, txn: &Transaction) -> Result<(), Error> {
        for (storage_key, observed) in txn.row_reads() {
            let current = self.row_version(storage_key)?;
            if current != *observed {
                return Err(Error::Conflict(format!(
                    "row {} changed (read version {}, now {})",
                    hex::encode(storage_key),
                    observed,
                    current
                )));
            }
        }
        for (table, observed) in txn.table_reads() {
            let current = self.table_version(table)?;
            if current != *observed {
                return Err(Error::Conflict(format!(
                    "table '{}' changed (read version {}, now {})",
                    table, observed, current
                )));
            }
        }
        Ok(())
    }

    fn prepare(&self, schema: &DatabaseSchema, mutation: &Mutation) -> Result<PreparedWrite, Error> {
        let table = schema
            .table(mutation.table())
            .ok_or_else(|| Error::UnknownTable(mutation.table().to_string()))?;
        let key = mutation.key();
        check_key(table, key)?;

        let op = match mutation {
            Mutation::Insert { values, .. } => {
                check_columns(table, values)?;
                for field in table.fields().iter().filter(|f| !f.nullable) {
                    let present = values
                        .iter()
                        .any(|(name, value)| name == &field.name && !value.is_null());
                    if !present {
                        return Err(Error::NullValue {
                            field: field.name.clone(),
                        });
                    }
                }
                PreparedOp::Insert(values.clone())
            }
            Mutation::Update { values, .. } => {
                check_columns(table, values)?;
                PreparedOp::Update(values.clone())
            }
            Mutation::Upsert { values, .. } => {
                check_columns(table, values)?;
                PreparedOp::Upsert(values.clone())
            }
            Mutation::Delete { .. } => PreparedOp::Delete,
        };

        Ok(PreparedWrite {
            table: table.table().to_string(),
            storage_key: row_key(table.table(), &encode_key(key)),
            op,
        })
    }

    fn apply_writes(&self, writes: &[PreparedWrite]) -> Result<u64, Error> {
        let touched: BTreeSet<&str> = writes.iter().map(|w| w.table.as_str()).collect();

        let result: Result<u64, TransactionError<Error>> =
            (&self.rows, &self.meta).transaction(|(rows_tx, meta_tx)| {
                let seq = meta_tx
                    .get(COMMIT_SEQ_KEY)?
                    .map(|bytes| decode_u64(&bytes))
                    .unwrap_or(0)
                    + 1;
                let now = current_timestamp();

                for write in writes {
                    let existing = rows_tx.get(write.storage_key.as_slice())?;
                    let row = match (&write.op, existing) {
                        (PreparedOp::Delete, _) => {
                            rows_tx.remove(write.storage_key.as_slice())?;
                            continue;
                        }
                        (PreparedOp::Insert(_), Some(_)) => {
                            return Err(ConflictableTransactionError::Abort(Error::DuplicateKey {
                                table: write.table.clone(),
                            }));
                        }
                        (PreparedOp::Update(_), None) => {
                            return Err(ConflictableTransactionError::Abort(Error::RowNotFound {
                                table: write.table.clone(),
                            }));
                        }
                        (PreparedOp::Insert(values), None) | (PreparedOp::Upsert(values), None) => {
                            StoredRow::new(seq, values.clone())
                        }
                        (PreparedOp::Update(values), Some(bytes))
                        | (PreparedOp::Upsert(values), Some(bytes)) => {
                            let mut row = StoredRow::from_bytes(&bytes)
                                .map_err(ConflictableTransactionError::Abort)?;
                            row.merge(values);
                            row.version = seq;
                            row.updated_at = now;
                            row
                        }
                    };
                    let bytes = row.to_bytes().map_err(ConflictableTransactionError::Abort)?;
                    rows_tx.insert(write.storage_key.as_slice(), bytes)?;
                }

                meta_tx.insert(COMMIT_SEQ_KEY, seq.to_be_bytes().to_vec())?;
                for table in &touched {
                    meta_tx.insert(table_version_key(table), seq.to_be_bytes().to_vec())?;
                }
                Ok(seq)
            });

        match result {
            Ok(seq) => Ok(seq),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    /// Bump the commit sequence and the version of `table`.
    fn bump_table_version(&self, table: &str) -> Result<(), Error> {
        let seq = self.read_u64(COMMIT_SEQ_KEY)? + 1;
        self.meta.insert(COMMIT_SEQ_KEY, seq.to_be_bytes().to_vec())?;
        self.meta
            .insert(table_version_key(table), seq.to_be_bytes().to_vec())?;
        Ok(())
    }

    fn drop_rows(&self, table: &str) -> Result<usize, Error> {
        let mut batch = sled::Batch::default();
        let mut count = 0;
        for item in self.rows.scan_prefix(table_prefix(table)) {
            let (key, _) = item?;
            batch.remove(key);
            count += 1;
        }
        self.rows.apply_batch(batch)?;
        Ok(count)
    }

    fn drop_column_values(&self, table: &str, column: &str) -> Result<(), Error> {
        let mut batch = sled::Batch::default();
        for item in self.rows.scan_prefix(table_prefix(table)) {
            let (key, bytes) = item?;
            let mut row = StoredRow::from_bytes(&bytes)?;
            let before = row.values.len();
            row.values.retain(|(name, _)| name != column);
            if row.values.len() != before {
                batch.insert(key, row.to_bytes()?);
            }
        }
        self.rows.apply_batch(batch)?;
        Ok(())
    }
}

impl Backend for SledStore {
    fn begin_read_only(&self) -> Result<Transaction, Error> {
        Ok(self.begin(TransactionMode::ReadOnly))
    }

    fn begin_read_write(&self) -> Result<Transaction, Error> {
        Ok(self.begin(TransactionMode::ReadWrite))
    }

    fn execute_query(&self, txn: &mut Transaction, request: &ReadRequest) -> Result<Vec<Row>, Error> {
        let schema = self.schema.read();
        let table = schema
            .table(&request.table)
            .ok_or_else(|| Error::UnknownTable(request.table.clone()))?;
        for column in &request.columns {
            if table.field(column).is_none() {
                return Err(Error::UnknownField {
                    table: request.table.clone(),
                    field: column.clone(),
                });
            }
        }
        if let Some(index) = &request.force_index {
            if table.index(index).is_none() {
                return Err(Error::UnknownIndex {
                    table: request.table.clone(),
                    index: index.clone(),
                });
            }
        }

        debug!(txn = txn.id(), sql = %request.to_sql().sql, "execute query");

        let mut rows = Vec::new();
        match point_keys(table, &request.filters) {
            Some(keys) => {
                for key in keys {
                    let storage_key = row_key(table.table(), &encode_key(&key));
                    match self.rows.get(&storage_key)? {
                        Some(bytes) => {
                            let stored = StoredRow::from_bytes(&bytes)?;
                            txn.record_row_read(storage_key, stored.version);
                            rows.push(project(&stored, &request.columns));
                        }
                        None => txn.record_row_read(storage_key, 0),
                    }
                }
            }
            None => {
                txn.record_table_read(table.table(), self.table_version(table.table())?);
                for item in self.rows.scan_prefix(table_prefix(table.table())) {
                    let (_, bytes) = item?;
                    let stored = StoredRow::from_bytes(&bytes)?;
                    rows.push(project(&stored, &request.columns));
                }
            }
        }

        rows.retain(|row| FilterEvaluator::matches_all(&request.filters, row));
        if !request.order_by.is_empty() {
            rows.sort_by(|a, b| FilterEvaluator::order_rows(a, b, &request.order_by));
        }
        if let Some(limit) = request.limit {
            rows = rows
                .into_iter()
                .skip(limit.offset as usize)
                .take(limit.limit as usize)
                .collect();
        }
        Ok(rows)
    }

    fn commit(&self, txn: Transaction) -> Result<(), Error> {
        if txn.is_read_only() {
            debug!(txn = txn.id(), "read-only commit");
            return Ok(());
        }

        let _guard = self.commit_lock.lock();
        // Validated even without writes so its reads form one consistent view.
        self.validate_reads(&txn)?;
        if txn.mutations().is_empty() {
            debug!(txn = txn.id(), "commit without writes");
            return Ok(());
        }

        let writes = {
            let schema = self.schema.read();
            txn.mutations()
                .iter()
                .map(|m| self.prepare(&schema, m))
                .collect::<Result<Vec<_>, _>>()?
        };
        let seq = self.apply_writes(&writes)?;
        debug!(txn = txn.id(), seq, writes = writes.len(), "committed transaction");
        Ok(())
    }

    fn apply_schema_change(&self, update: &SchemaUpdate) -> Result<(), Error> {
        let _guard = self.commit_lock.lock();
        let mut schema = self.schema.write();

        let mut next = schema.clone();
        update.validate(&next)?;
        update.apply_to(&mut next)?;

        match update {
            SchemaUpdate::DropTable { table } => {
                let removed = self.drop_rows(table)?;
                debug!(table = %table, rows = removed, "dropped table rows");
            }
            SchemaUpdate::DropColumn { table, column } => {
                self.drop_column_values(table, column)?;
            }
            _ => {}
        }
        if let Some(table) = update.table() {
            self.bump_table_version(table)?;
        }

        self.meta.insert(SCHEMA_KEY, next.to_bytes()?)?;
        *schema = next;

        match update.ddl() {
            Some(ddl) => info!(ddl = %ddl, "applied schema change"),
            None => debug!("schema update is a no-op"),
        }
        Ok(())
    }

    fn database_schema(&self) -> Result<DatabaseSchema, Error> {
        Ok(self.schema.read().clone())
    }
}

fn table_version_key(table: &str) -> Vec<u8> {
    let mut key = TABLE_VERSION_PREFIX.to_vec();
    key.extend_from_slice(table.as_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(buf)
}

fn project(stored: &StoredRow, columns: &[String]) -> Row {
    columns
        .iter()
        .map(|c| (c.clone(), stored.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn check_key(table: &ModelSchema, key: &Key) -> Result<(), Error> {
    if key.len() != table.primary_key().len() {
        return Err(Error::InvalidSchema(format!(
            "key for '{}' has {} parts, expected {}",
            table.table(),
            key.len(),
            table.primary_key().len()
        )));
    }
    for (field, value) in table.primary_key_fields().zip(key) {
        field.validate(value)?;
    }
    Ok(())
}

fn check_columns(table: &ModelSchema, values: &Row) -> Result<(), Error> {
    for (name, value) in values {
        let field = table.field(name).ok_or_else(|| Error::UnknownField {
            table: table.table().to_string(),
            field: name.clone(),
        })?;
        field.validate(value)?;
    }
    Ok(())
}

/// Exact primary keys selected by `filters`, if the read is a point lookup.
fn point_keys(table: &ModelSchema, filters: &[Predicate]) -> Option<Vec<Key>> {
    let primary_key = table.primary_key();
    for filter in filters {
        if let Predicate::KeyIn { columns, keys } = filter {
            if columns.as_slice() == primary_key {
                return Some(keys.clone());
            }
        }
    }

    let key: Option<Key> = primary_key
        .iter()
        .map(|column| {
            filters.iter().find_map(|filter| match filter {
                Predicate::Compare {
                    column: c,
                    op: ComparisonOp::Eq,
                    value,
                } if c == column => Some(value.clone()),
                _ => None,
            })
        })
        .collect();
    key.map(|k| vec![k])
}
