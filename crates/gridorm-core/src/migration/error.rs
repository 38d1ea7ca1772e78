//! Migration error types.

use thiserror::Error;

use crate::error::Error;

/// Errors raised while loading or executing migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Core error outside of a specific migration step.
    #[error(transparent)]
    Core(#[from] Error),

    /// Migration files do not form a single chain.
    #[error("invalid migration chain: {0}")]
    Chain(String),

    /// Migration id is not known.
    #[error("migration not found: {0}")]
    NotFound(String),

    /// Target migration is already in the requested state.
    #[error("migration {id} is already {state}")]
    AlreadyInState {
        /// Migration id.
        id: String,
        /// "migrated" or "unmigrated".
        state: &'static str,
    },

    /// The schema update of a migration failed; nothing was recorded.
    #[error("migration {id} failed: {source}")]
    Update {
        /// Migration id.
        id: String,
        /// Underlying error.
        source: Error,
    },

    /// The schema update succeeded but the ledger could not be written.
    ///
    /// The database schema and the ledger now disagree and must be
    /// reconciled by hand.
    #[error("migration {id} was applied but the ledger write failed: {source}")]
    LedgerOutOfSync {
        /// Migration id.
        id: String,
        /// Underlying error.
        source: Error,
    },

    /// Migration file could not be read or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration file is not valid JSON.
    #[error("invalid migration file: {0}")]
    Json(#[from] serde_json::Error),
}
