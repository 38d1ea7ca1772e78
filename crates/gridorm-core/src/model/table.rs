//! Table-level persistence API.
//!
//! Every operation takes an optional transaction as its last argument. With
//! `Some(txn)` the work joins that transaction and is neither committed nor
//! retried here. With `None` the operation opens its own transaction, so two
//! consecutive calls are not atomic with respect to each other.

use std::sync::Arc;

use tracing::debug;

use super::instance::ModelInstance;
use crate::catalog::ModelSchema;
use crate::condition::{equal_to, Condition, ConditionBuilder};
use crate::database::Database;
use crate::error::Error;
use crate::query::{check_key, QueryExecutor};
use crate::storage::Row;
use crate::transaction::{Mutation, Transaction};
use crate::value::{Key, Value};

/// Persistence operations for one model.
pub struct Table<'db> {
    db: &'db Database,
    schema: Arc<ModelSchema>,
}

impl<'db> Table<'db> {
    pub(crate) fn new(db: &'db Database, schema: Arc<ModelSchema>) -> Self {
        Self { db, schema }
    }

    /// The model schema.
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Build an unsaved instance of this model.
    pub fn instance<I, K, V>(&self, values: I) -> Result<ModelInstance, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        ModelInstance::new(self.schema.clone(), values)
    }

    fn read<T, F>(&self, txn: Option<&mut Transaction>, f: F) -> Result<T, Error>
    where
        F: FnOnce(&QueryExecutor<'_>, &mut Transaction) -> Result<T, Error>,
    {
        let executor = QueryExecutor::new(self.db.backend().as_ref());
        self.db
            .runner()
            .transactional_read(txn, |txn| f(&executor, txn))
    }

    fn write(&self, mutations: Vec<Mutation>, txn: Option<&mut Transaction>) -> Result<(), Error> {
        if mutations.is_empty() {
            return Ok(());
        }
        debug!(table = %self.schema.table(), mutations = mutations.len(), "writing");
        let backend = self.db.backend();
        self.db.runner().transactional_write(txn, |txn| {
            for mutation in &mutations {
                backend.execute_dml(txn, mutation.clone())?;
            }
            Ok(())
        })
    }

    /// Validate column values and split out the primary key.
    fn bind<I, K, V>(&self, values: I) -> Result<(Key, Row), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut row = Row::new();
        for (name, value) in values {
            let name = name.into();
            let value = value.into();
            let field = self.schema.field(&name).ok_or_else(|| Error::UnknownField {
                table: self.schema.table().to_string(),
                field: name.clone(),
            })?;
            field.validate(&value)?;
            row.push((name, value));
        }

        let key = self
            .schema
            .primary_key()
            .iter()
            .map(|column| {
                row.iter()
                    .find(|(name, value)| name == column && !value.is_null())
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| Error::MissingPrimaryKey {
                        table: self.schema.table().to_string(),
                        field: column.clone(),
                    })
            })
            .collect::<Result<Key, Error>>()?;
        Ok((key, row))
    }

    /// Every row of the table.
    pub fn all(&self, txn: Option<&mut Transaction>) -> Result<Vec<ModelInstance>, Error> {
        self.where_(&[], txn)
    }

    /// Rows matching `conditions`, with any requested includes attached.
    pub fn where_(
        &self,
        conditions: &[Condition],
        txn: Option<&mut Transaction>,
    ) -> Result<Vec<ModelInstance>, Error> {
        let plan = ConditionBuilder::new(self.db.registry()).build(&self.schema, conditions)?;
        self.read(txn, |executor, txn| executor.execute(txn, &plan))
    }

    /// Rows whose columns equal the given values.
    pub fn where_equal<K, V>(
        &self,
        values: impl IntoIterator<Item = (K, V)>,
        txn: Option<&mut Transaction>,
    ) -> Result<Vec<ModelInstance>, Error>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let conditions: Vec<Condition> = values
            .into_iter()
            .map(|(k, v)| {
                let name: String = k.into();
                equal_to(name, v)
            })
            .collect();
        self.where_(&conditions, txn)
    }

    /// Number of rows matching `conditions`. Only filters are accepted.
    pub fn count(&self, conditions: &[Condition], txn: Option<&mut Transaction>) -> Result<u64, Error> {
        let plan = ConditionBuilder::new(self.db.registry()).build_count(&self.schema, conditions)?;
        self.read(txn, |executor, txn| executor.count(txn, &plan))
    }

    /// Number of rows whose columns equal the given values.
    pub fn count_equal<K, V>(
        &self,
        values: impl IntoIterator<Item = (K, V)>,
        txn: Option<&mut Transaction>,
    ) -> Result<u64, Error>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let conditions: Vec<Condition> = values
            .into_iter()
            .map(|(k, v)| {
                let name: String = k.into();
                equal_to(name, v)
            })
            .collect();
        self.count(&conditions, txn)
    }

    /// The row with primary key `key`, if any.
    pub fn find(&self, key: &[Value], txn: Option<&mut Transaction>) -> Result<Option<ModelInstance>, Error> {
        Ok(self.find_multi(vec![key.to_vec()], txn)?.pop())
    }

    /// The rows with the given primary keys, in one read. Missing keys are
    /// skipped.
    pub fn find_multi(
        &self,
        keys: Vec<Key>,
        txn: Option<&mut Transaction>,
    ) -> Result<Vec<ModelInstance>, Error> {
        self.read(txn, |executor, txn| executor.find_multi(txn, &self.schema, keys))
    }

    /// Insert a new row built from `values` and return it.
    pub fn create<I, K, V>(&self, values: I, txn: Option<&mut Transaction>) -> Result<ModelInstance, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut instance = self.instance(values)?;
        self.save(&mut instance, txn)?;
        Ok(instance)
    }

    /// Overwrite the given columns of an existing row. Fails if the row does
    /// not exist.
    pub fn update<I, K, V>(&self, values: I, txn: Option<&mut Transaction>) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (key, values) = self.bind(values)?;
        let table = self.schema.table().to_string();
        self.write(vec![Mutation::Update { table, key, values }], txn)
    }

    /// Insert a row or overwrite the given columns of an existing one.
    pub fn upsert<I, K, V>(&self, values: I, txn: Option<&mut Transaction>) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (key, values) = self.bind(values)?;
        let table = self.schema.table().to_string();
        self.write(vec![Mutation::Upsert { table, key, values }], txn)
    }

    fn save_mutation(&self, instance: &ModelInstance, force_write: bool) -> Result<Option<Mutation>, Error> {
        if instance.table() != self.schema.table() {
            return Err(Error::UnknownTable(instance.table().to_string()));
        }
        let table = self.schema.table().to_string();
        let key = instance.id();

        if force_write {
            instance.check_writable()?;
            return Ok(Some(Mutation::Upsert {
                table,
                key,
                values: instance.row(),
            }));
        }
        if instance.is_persisted() {
            let changes = instance.changes();
            if changes.is_empty() {
                return Ok(None);
            }
            return Ok(Some(Mutation::Update {
                table,
                key,
                values: changes,
            }));
        }
        instance.check_writable()?;
        Ok(Some(Mutation::Insert {
            table,
            key,
            values: instance.row(),
        }))
    }

    /// Write an instance.
    ///
    /// An unsaved instance is inserted and fails if its key already exists.
    /// A loaded instance writes only its changed columns.
    ///
    /// The instance is marked persisted as soon as the write is buffered.
    /// With `Some(txn)` that happens before the caller commits, so if the
    /// transaction is then abandoned the instance must be discarded or
    /// rebuilt; saving it again would issue an update for a row that was
    /// never written. [`Table::reload`] returning `false` detects this.
    pub fn save(&self, instance: &mut ModelInstance, txn: Option<&mut Transaction>) -> Result<(), Error> {
        let mutations: Vec<Mutation> = self.save_mutation(instance, false)?.into_iter().collect();
        self.write(mutations, txn)?;
        instance.mark_persisted();
        Ok(())
    }

    /// Write several instances in one transaction.
    ///
    /// With `force_write` every instance is upserted whole, whether or not it
    /// exists. Instances are marked persisted the same way as in
    /// [`Table::save`].
    pub fn save_batch(
        &self,
        instances: &mut [ModelInstance],
        force_write: bool,
        txn: Option<&mut Transaction>,
    ) -> Result<(), Error> {
        let mut mutations = Vec::with_capacity(instances.len());
        for instance in instances.iter() {
            mutations.extend(self.save_mutation(instance, force_write)?);
        }
        self.write(mutations, txn)?;
        for instance in instances.iter_mut() {
            instance.mark_persisted();
        }
        Ok(())
    }

    /// Delete the row with primary key `key`, if present.
    pub fn delete(&self, key: &[Value], txn: Option<&mut Transaction>) -> Result<(), Error> {
        self.delete_batch(vec![key.to_vec()], txn)
    }

    /// Delete several rows in one transaction.
    pub fn delete_batch(&self, keys: Vec<Key>, txn: Option<&mut Transaction>) -> Result<(), Error> {
        let mut mutations = Vec::with_capacity(keys.len());
        for key in keys {
            check_key(&self.schema, &key)?;
            mutations.push(Mutation::Delete {
                table: self.schema.table().to_string(),
                key,
            });
        }
        self.write(mutations, txn)
    }

    /// Refresh an instance from the database.
    ///
    /// Returns `false`, leaving the instance untouched, if its row no longer
    /// exists.
    pub fn reload(&self, instance: &mut ModelInstance, txn: Option<&mut Transaction>) -> Result<bool, Error> {
        match self.find(&instance.id(), txn)? {
            Some(fresh) => {
                instance.replace_with(fresh);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
