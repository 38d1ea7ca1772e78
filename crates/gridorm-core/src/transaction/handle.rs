//! Transaction handles.

use std::collections::HashMap;

use crate::error::Error;
use crate::storage::Row;
use crate::value::Key;

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only; never validated or retried.
    ReadOnly,
    /// Reads and buffered writes, validated at commit.
    ReadWrite,
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionMode::ReadOnly => write!(f, "read_only"),
            TransactionMode::ReadWrite => write!(f, "read_write"),
        }
    }
}

/// A buffered row write.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert a new row; fails if the key exists.
    Insert {
        /// Table name.
        table: String,
        /// Primary key tuple.
        key: Key,
        /// Column values, key columns included.
        values: Row,
    },
    /// Overwrite columns of an existing row; fails if the key is missing.
    Update {
        /// Table name.
        table: String,
        /// Primary key tuple.
        key: Key,
        /// Columns to overwrite.
        values: Row,
    },
    /// Insert or overwrite columns.
    Upsert {
        /// Table name.
        table: String,
        /// Primary key tuple.
        key: Key,
        /// Columns to write.
        values: Row,
    },
    /// Delete a row if present.
    Delete {
        /// Table name.
        table: String,
        /// Primary key tuple.
        key: Key,
    },
}

impl Mutation {
    /// Table written by this mutation.
    pub fn table(&self) -> &str {
        match self {
            Mutation::Insert { table, .. }
            | Mutation::Update { table, .. }
            | Mutation::Upsert { table, .. }
            | Mutation::Delete { table, .. } => table,
        }
    }

    /// Primary key written by this mutation.
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Insert { key, .. }
            | Mutation::Update { key, .. }
            | Mutation::Upsert { key, .. }
            | Mutation::Delete { key, .. } => key,
        }
    }

    /// Short operation name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Insert { .. } => "insert",
            Mutation::Update { .. } => "update",
            Mutation::Upsert { .. } => "upsert",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// A handle bound to one database transaction.
///
/// Writes are buffered and only reach the store at commit; reads inside the
/// same transaction do not observe them. The read set records what the
/// transaction saw so the store can detect conflicting commits.
///
/// A handle is only ever used through `&mut`, so it cannot be shared by
/// concurrent callbacks.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    mode: TransactionMode,
    attempt: u32,
    /// Storage key -> row version observed (0 when absent).
    row_reads: HashMap<Vec<u8>, u64>,
    /// Table -> table version observed by a scan.
    table_reads: HashMap<String, u64>,
    mutations: Vec<Mutation>,
}

impl Transaction {
    /// Create a transaction handle. Called by store implementations.
    pub fn new(id: u64, mode: TransactionMode) -> Self {
        Self {
            id,
            mode,
            attempt: 1,
            row_reads: HashMap::new(),
            table_reads: HashMap::new(),
            mutations: Vec::new(),
        }
    }

    /// Transaction id, unique per store.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transaction mode.
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Whether the transaction is read-only.
    pub fn is_read_only(&self) -> bool {
        self.mode == TransactionMode::ReadOnly
    }

    /// Attempt number within the runner, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Buffer a mutation until commit.
    pub fn buffer(&mut self, mutation: Mutation) -> Result<(), Error> {
        if self.is_read_only() {
            return Err(Error::ReadOnlyTransaction);
        }
        self.mutations.push(mutation);
        Ok(())
    }

    /// Buffered mutations, in issue order.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Record a point read. The first observation of a key wins.
    pub fn record_row_read(&mut self, storage_key: Vec<u8>, version: u64) {
        self.row_reads.entry(storage_key).or_insert(version);
    }

    /// Record a table scan. The first observation of a table wins.
    pub fn record_table_read(&mut self, table: &str, version: u64) {
        self.table_reads
            .entry(table.to_string())
            .or_insert(version);
    }

    /// Point reads performed so far.
    pub fn row_reads(&self) -> &HashMap<Vec<u8>, u64> {
        &self.row_reads
    }

    /// Table scans performed so far.
    pub fn table_reads(&self) -> &HashMap<String, u64> {
        &self.table_reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn delete(key: &str) -> Mutation {
        Mutation::Delete {
            table: "t".into(),
            key: vec![Value::from(key)],
        }
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut txn = Transaction::new(1, TransactionMode::ReadOnly);
        assert!(matches!(
            txn.buffer(delete("a")),
            Err(Error::ReadOnlyTransaction)
        ));
        assert!(txn.mutations().is_empty());
    }

    #[test]
    fn test_buffered_mutations_keep_order() {
        let mut txn = Transaction::new(2, TransactionMode::ReadWrite);
        txn.buffer(delete("a")).unwrap();
        txn.buffer(delete("b")).unwrap();
        let keys: Vec<_> = txn.mutations().iter().map(|m| m.key().clone()).collect();
        assert_eq!(keys, vec![vec![Value::from("a")], vec![Value::from("b")]]);
        assert_eq!(txn.mutations()[0].kind(), "delete");
    }

    #[test]
    fn test_first_read_wins() {
        let mut txn = Transaction::new(3, TransactionMode::ReadWrite);
        txn.record_row_read(b"k".to_vec(), 4);
        txn.record_row_read(b"k".to_vec(), 9);
        txn.record_table_read("t", 1);
        txn.record_table_read("t", 2);
        assert_eq!(txn.row_reads()[&b"k".to_vec()], 4);
        assert_eq!(txn.table_reads()["t"], 1);
    }
}
