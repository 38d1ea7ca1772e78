//! Query execution over a [`Backend`].

use std::sync::Arc;

use tracing::debug;

use super::join::HashJoinExecutor;
use crate::catalog::ModelSchema;
use crate::condition::{QueryPlan, ReadRequest};
use crate::error::Error;
use crate::model::ModelInstance;
use crate::storage::Backend;
use crate::transaction::Transaction;
use crate::value::{Key, Value};

/// Executes query plans inside a caller-supplied transaction.
///
/// Issues one read for the plan itself plus one read per include, at every
/// nesting level.
pub struct QueryExecutor<'a> {
    backend: &'a dyn Backend,
}

impl<'a> QueryExecutor<'a> {
    /// Create an executor over `backend`.
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Execute `plan` and resolve its includes.
    pub fn execute(&self, txn: &mut Transaction, plan: &QueryPlan) -> Result<Vec<ModelInstance>, Error> {
        let request = plan.read_request();
        let rows = self.backend.execute_query(txn, &request)?;
        debug!(table = %plan.table(), rows = rows.len(), includes = plan.includes.len(), "query executed");

        let mut instances = rows
            .into_iter()
            .map(|row| ModelInstance::from_row(plan.model.clone(), row))
            .collect::<Result<Vec<_>, _>>()?;
        HashJoinExecutor::attach_all(self.backend, txn, &mut instances, &plan.includes)?;
        Ok(instances)
    }

    /// Count the rows matching `plan`'s filters.
    pub fn count(&self, txn: &mut Transaction, plan: &QueryPlan) -> Result<u64, Error> {
        let request = plan.read_request();
        debug!(sql = %request.to_count_sql().sql, "count");
        let rows = self.backend.execute_query(txn, &request)?;
        Ok(rows.len() as u64)
    }

    /// Fetch the rows of `model` with the given primary keys, in one read.
    ///
    /// Missing keys are skipped. An empty key list issues no read.
    pub fn find_multi(
        &self,
        txn: &mut Transaction,
        model: &Arc<ModelSchema>,
        keys: Vec<Key>,
    ) -> Result<Vec<ModelInstance>, Error> {
        for key in &keys {
            check_key(model, key)?;
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let request = ReadRequest::by_keys(model, keys);
        self.backend
            .execute_query(txn, &request)?
            .into_iter()
            .map(|row| ModelInstance::from_row(model.clone(), row))
            .collect()
    }
}

/// Check that `key` is a full, well-typed primary key of `model`.
pub fn check_key(model: &ModelSchema, key: &[Value]) -> Result<(), Error> {
    let columns = model.primary_key();
    if key.len() != columns.len() {
        return Err(Error::MalformedCondition(format!(
            "key for '{}' has {} values, expected {}",
            model.table(),
            key.len(),
            columns.len()
        )));
    }
    for (field, value) in model.primary_key_fields().zip(key) {
        if value.is_null() {
            return Err(Error::MissingPrimaryKey {
                table: model.table().to_string(),
                field: field.name.clone(),
            });
        }
        field.validate(value)?;
    }
    Ok(())
}
