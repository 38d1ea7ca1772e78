//! Database handle: a backend, the model registry, and a transaction runner.

use std::sync::Arc;

use tracing::info;

use crate::catalog::Registry;
use crate::config::{DatabaseConfig, RetryPolicy};
use crate::error::Error;
use crate::model::Table;
use crate::storage::{Backend, SledStore};
use crate::transaction::{Transaction, TransactionRunner};

/// Entry point for reading and writing models.
///
/// Cheap to share behind an `Arc`; every operation opens its own transaction
/// unless one is passed in.
pub struct Database {
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    runner: TransactionRunner,
}

impl Database {
    /// Create a database over an existing backend.
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<Registry>, retry: RetryPolicy) -> Self {
        let runner = TransactionRunner::new(backend.clone(), retry);
        Self {
            backend,
            registry,
            runner,
        }
    }

    /// Open a sled-backed database.
    pub fn open(config: DatabaseConfig, registry: Arc<Registry>) -> Result<Self, Error> {
        let store = SledStore::open(config.store.clone())?;
        info!(
            path = %config.store.path.display(),
            models = registry.len(),
            max_attempts = config.retry.max_attempts,
            "opened database"
        );
        Ok(Self::new(Arc::new(store), registry, config.retry))
    }

    /// Persistence API for the model stored in `table`.
    pub fn table(&self, table: &str) -> Result<Table<'_>, Error> {
        Ok(Table::new(self, self.registry.get(table)?))
    }

    /// The model registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The transaction runner.
    pub fn runner(&self) -> &TransactionRunner {
        &self.runner
    }

    /// Run `f` in a read-only transaction.
    pub fn run_read_only<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Transaction) -> Result<T, Error>,
    {
        self.runner.run_read_only(f)
    }

    /// Run `f` in a read-write transaction, retrying on conflict.
    pub fn run_write<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnMut(&mut Transaction) -> Result<T, Error>,
    {
        self.runner.run_write(f)
    }
}
