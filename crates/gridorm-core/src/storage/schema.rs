//! Live database schema, as tracked by the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{IndexDef, ModelSchema};
use crate::error::Error;

/// The tables that currently exist in a database.
///
/// Unlike the model registry this changes over time, one schema update at a
/// time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    tables: BTreeMap<String, ModelSchema>,
}

impl DatabaseSchema {
    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&ModelSchema> {
        self.tables.get(name)
    }

    /// Whether a table exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// All tables, ordered by name.
    pub fn tables(&self) -> impl Iterator<Item = &ModelSchema> {
        self.tables.values()
    }

    /// Find an index by name across all tables.
    pub fn find_index(&self, name: &str) -> Option<(&ModelSchema, &IndexDef)> {
        self.tables
            .values()
            .find_map(|table| table.index(name).map(|index| (table, index)))
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Result<&mut ModelSchema, Error> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    pub(crate) fn insert_table(&mut self, table: ModelSchema) {
        self.tables.insert(table.table().to_string(), table);
    }

    pub(crate) fn remove_table(&mut self, name: &str) -> Option<ModelSchema> {
        self.tables.remove(name)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, FieldType};

    #[test]
    fn test_schema_roundtrip() {
        let mut schema = DatabaseSchema::default();
        schema.insert_table(
            ModelSchema::builder("t")
                .with_field(FieldDef::new("id", FieldType::String).primary_key())
                .with_index(IndexDef::new("by_id", ["id"]))
                .build()
                .unwrap(),
        );
        let decoded = DatabaseSchema::from_bytes(&schema.to_bytes().unwrap()).unwrap();
        assert_eq!(schema, decoded);
        assert!(decoded.contains("t"));
        assert_eq!(decoded.find_index("by_id").map(|(t, _)| t.table()), Some("t"));
    }
}
