//! Core error types.

use thiserror::Error;

use crate::catalog::FieldType;

/// Core ORM errors.
///
/// Validation variants are raised while building a query plan or a model
/// instance and never reach the store. `Conflict` is the only variant the
/// transaction runner recovers from locally.
#[derive(Debug, Error)]
pub enum Error {
    /// Table is not registered or does not exist in the database.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Field name does not exist on the model.
    #[error("unknown field '{field}' on table '{table}'")]
    UnknownField {
        /// Table that was searched.
        table: String,
        /// Field that was requested.
        field: String,
    },

    /// Relationship name does not exist on the model.
    #[error("unknown relationship '{relationship}' on table '{table}'")]
    UnknownRelationship {
        /// Table that was searched.
        table: String,
        /// Relationship that was requested.
        relationship: String,
    },

    /// Index name does not exist on the model.
    #[error("unknown index '{index}' on table '{table}'")]
    UnknownIndex {
        /// Table that was searched.
        table: String,
        /// Index that was requested.
        index: String,
    },

    /// Value type does not match the field type.
    #[error("type mismatch for '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Field being bound.
        field: String,
        /// Declared field type.
        expected: FieldType,
        /// Type name of the supplied value.
        found: &'static str,
    },

    /// Null supplied for a non-nullable field.
    #[error("field '{field}' is not nullable")]
    NullValue {
        /// Field being bound.
        field: String,
    },

    /// A primary key column was not supplied.
    #[error("missing primary key field '{field}' for table '{table}'")]
    MissingPrimaryKey {
        /// Table being written.
        table: String,
        /// Missing key column.
        field: String,
    },

    /// Attempt to modify a field that cannot change after construction.
    #[error("field '{field}' on table '{table}' cannot be modified")]
    ImmutableField {
        /// Table of the instance.
        table: String,
        /// Field that was assigned.
        field: String,
    },

    /// Structurally invalid condition list.
    #[error("malformed condition: {0}")]
    MalformedCondition(String),

    /// Invalid model or table definition.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Model registry error.
    #[error("registry error: {0}")]
    Registry(String),

    /// Insert of a primary key that already exists.
    #[error("duplicate key in table '{table}'")]
    DuplicateKey {
        /// Table being written.
        table: String,
    },

    /// Update of a row that does not exist.
    #[error("row not found in table '{table}'")]
    RowNotFound {
        /// Table being written.
        table: String,
    },

    /// A single-valued relationship matched more than one row.
    #[error("relationship '{relationship}' is single but matched {count} rows")]
    MultipleRelated {
        /// Relationship being resolved.
        relationship: String,
        /// Number of matching rows.
        count: usize,
    },

    /// Data read by the transaction changed before commit.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Read-write callback kept conflicting until the retry bound was hit.
    #[error("transaction aborted after {attempts} attempts")]
    TooManyRetries {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Mutation issued against a read-only transaction.
    #[error("cannot write in a read-only transaction")]
    ReadOnlyTransaction,

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl Error {
    /// Whether this error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Whether this error was raised by plan or value validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::UnknownTable(_)
                | Error::UnknownField { .. }
                | Error::UnknownRelationship { .. }
                | Error::UnknownIndex { .. }
                | Error::TypeMismatch { .. }
                | Error::NullValue { .. }
                | Error::MissingPrimaryKey { .. }
                | Error::ImmutableField { .. }
                | Error::MalformedCondition(_)
        )
    }
}

/// Result alias for core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
