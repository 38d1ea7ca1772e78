//! The boundary between the ORM and a transactional store.

use crate::condition::ReadRequest;
use crate::error::Error;
use crate::migration::SchemaUpdate;
use crate::transaction::{Mutation, Transaction};
use crate::value::Value;

use super::schema::DatabaseSchema;

/// A row as exchanged with the store: (column, value) pairs.
pub type Row = Vec<(String, Value)>;

/// Capabilities the ORM needs from a database.
///
/// Implementations must report optimistic-concurrency failures from
/// `execute_query` or `commit` as [`Error::Conflict`]; every other error is
/// treated as fatal for the current attempt.
pub trait Backend: Send + Sync {
    /// Begin a read-only transaction.
    ///
    /// Each read sees the latest committed data. Read-only transactions are
    /// never validated, so two reads in one may observe different commits.
    fn begin_read_only(&self) -> Result<Transaction, Error>;

    /// Begin a read-write transaction.
    fn begin_read_write(&self) -> Result<Transaction, Error>;

    /// Execute a single-table read inside `txn`.
    fn execute_query(&self, txn: &mut Transaction, request: &ReadRequest) -> Result<Vec<Row>, Error>;

    /// Issue a write inside `txn`.
    fn execute_dml(&self, txn: &mut Transaction, mutation: Mutation) -> Result<(), Error> {
        txn.buffer(mutation)
    }

    /// Commit `txn`, applying its writes atomically.
    ///
    /// A read-write transaction must fail with [`Error::Conflict`] if anything
    /// it read has changed since, even when it made no writes.
    fn commit(&self, txn: Transaction) -> Result<(), Error>;

    /// Abandon `txn` without applying its writes.
    fn rollback(&self, txn: Transaction) {
        drop(txn);
    }

    /// Apply one schema statement.
    fn apply_schema_change(&self, update: &SchemaUpdate) -> Result<(), Error>;

    /// Current schema of the database.
    fn database_schema(&self) -> Result<DatabaseSchema, Error>;
}
