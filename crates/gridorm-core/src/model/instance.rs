//! Model instances: one row of a model, owned by the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::ModelSchema;
use crate::error::Error;
use crate::storage::Row;
use crate::value::{Key, Value};

/// Rows attached to an instance by an `includes` condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Result of a single-valued relationship.
    Single(Option<ModelInstance>),
    /// Result of a many-valued relationship.
    Many(Vec<ModelInstance>),
}

/// One row of a model.
///
/// Owns its values outright and holds no reference to the transaction it came
/// from. Related rows are copies attached after a batched re-query.
#[derive(Debug, Clone)]
pub struct ModelInstance {
    schema: Arc<ModelSchema>,
    values: BTreeMap<String, Value>,
    start_values: BTreeMap<String, Value>,
    persisted: bool,
    related: BTreeMap<String, Related>,
}

impl PartialEq for ModelInstance {
    fn eq(&self, other: &Self) -> bool {
        self.schema.table() == other.schema.table() && self.values == other.values
    }
}

impl ModelInstance {
    /// Create an unsaved instance.
    ///
    /// Every primary key column must be supplied. Columns not supplied start
    /// as NULL; non-nullable ones must be set before the instance is written.
    pub fn new<I, K, V>(schema: Arc<ModelSchema>, values: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut supplied = BTreeMap::new();
        for (name, value) in values {
            let name = name.into();
            let value = value.into();
            let field = schema.field(&name).ok_or_else(|| Error::UnknownField {
                table: schema.table().to_string(),
                field: name.clone(),
            })?;
            field.validate(&value)?;
            supplied.insert(name, value);
        }

        for key_field in schema.primary_key_fields() {
            if supplied.get(&key_field.name).map_or(true, Value::is_null) {
                return Err(Error::MissingPrimaryKey {
                    table: schema.table().to_string(),
                    field: key_field.name.clone(),
                });
            }
        }

        let values: BTreeMap<String, Value> = schema
            .fields()
            .iter()
            .map(|f| {
                let value = supplied.remove(&f.name).unwrap_or(Value::Null);
                (f.name.clone(), value)
            })
            .collect();

        Ok(Self {
            schema,
            values,
            start_values: BTreeMap::new(),
            persisted: false,
            related: BTreeMap::new(),
        })
    }

    /// Build a persisted instance from a stored row.
    pub fn from_row(schema: Arc<ModelSchema>, row: Row) -> Result<Self, Error> {
        let mut values = BTreeMap::new();
        for (name, value) in row {
            let field = schema.field(&name).ok_or_else(|| Error::UnknownField {
                table: schema.table().to_string(),
                field: name.clone(),
            })?;
            field.validate(&value)?;
            values.insert(name, value);
        }
        for field in schema.fields() {
            values.entry(field.name.clone()).or_insert(Value::Null);
        }
        for key_field in schema.primary_key_fields() {
            if values.get(&key_field.name).map_or(true, Value::is_null) {
                return Err(Error::MissingPrimaryKey {
                    table: schema.table().to_string(),
                    field: key_field.name.clone(),
                });
            }
        }

        Ok(Self {
            schema,
            start_values: values.clone(),
            values,
            persisted: true,
            related: BTreeMap::new(),
        })
    }

    /// The model schema.
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Table name.
    pub fn table(&self) -> &str {
        self.schema.table()
    }

    /// Get a column value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Set a column value. Primary key columns cannot be changed.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let value = value.into();
        let field = self.schema.field(name).ok_or_else(|| Error::UnknownField {
            table: self.schema.table().to_string(),
            field: name.to_string(),
        })?;
        if field.primary_key {
            return Err(Error::ImmutableField {
                table: self.schema.table().to_string(),
                field: name.to_string(),
            });
        }
        field.validate(&value)?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Primary key tuple; this is the instance's identity.
    pub fn id(&self) -> Key {
        self.schema
            .primary_key()
            .iter()
            .map(|name| self.values.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// All column values, keyed by name.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// All column values in declaration order.
    pub fn row(&self) -> Row {
        self.schema
            .fields()
            .iter()
            .map(|f| {
                let value = self.values.get(&f.name).cloned().unwrap_or(Value::Null);
                (f.name.clone(), value)
            })
            .collect()
    }

    /// Columns changed since the instance was loaded or last saved.
    ///
    /// For an unsaved instance this is every column.
    pub fn changes(&self) -> Row {
        self.row()
            .into_iter()
            .filter(|(name, value)| self.start_values.get(name) != Some(value))
            .collect()
    }

    /// Whether the instance has been loaded from or written to the database.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Rows attached for `relationship`, if it was included.
    pub fn related(&self, relationship: &str) -> Option<&Related> {
        self.related.get(relationship)
    }

    /// Rows of an included many-valued relationship.
    pub fn related_many(&self, relationship: &str) -> &[ModelInstance] {
        match self.related.get(relationship) {
            Some(Related::Many(rows)) => rows,
            _ => &[],
        }
    }

    /// Row of an included single-valued relationship.
    pub fn related_one(&self, relationship: &str) -> Option<&ModelInstance> {
        match self.related.get(relationship) {
            Some(Related::Single(row)) => row.as_ref(),
            _ => None,
        }
    }

    /// Check that every non-nullable column has a value.
    pub fn check_writable(&self) -> Result<(), Error> {
        for field in self.schema.fields() {
            let value = self.values.get(&field.name).unwrap_or(&Value::Null);
            field.validate(value)?;
        }
        Ok(())
    }

    pub(crate) fn attach(&mut self, relationship: &str, related: Related) {
        self.related.insert(relationship.to_string(), related);
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.start_values = self.values.clone();
        self.persisted = true;
    }

    pub(crate) fn replace_with(&mut self, fresh: ModelInstance) {
        self.values = fresh.values;
        self.start_values = fresh.start_values;
        self.persisted = true;
        self.related.clear();
    }
}
