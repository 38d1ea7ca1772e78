//! Model schema descriptors.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::field::FieldDef;
use super::index::{IndexDef, PRIMARY_INDEX};
use super::relation::RelationshipDef;
use crate::error::Error;

/// Immutable description of a table: columns, primary key, indexes, and
/// relationships.
///
/// Built once through [`ModelSchema::builder`]. The primary key is made of
/// the columns marked primary, in declaration order, and never changes after
/// `build()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub(crate) table: String,
    pub(crate) parent: Option<String>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) primary_key: Vec<String>,
    pub(crate) indexes: Vec<IndexDef>,
    pub(crate) relationships: Vec<RelationshipDef>,
}

/// Builder for [`ModelSchema`].
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    table: String,
    parent: Option<String>,
    fields: Vec<FieldDef>,
    indexes: Vec<IndexDef>,
    relationships: Vec<RelationshipDef>,
}

impl ModelBuilder {
    /// Add a column.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple columns.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add a secondary index.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a relationship or foreign key.
    pub fn with_relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Interleave this table in a parent table.
    pub fn interleaved_in(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Freeze the schema.
    pub fn build(self) -> Result<ModelSchema, Error> {
        let primary_key: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.clone())
            .collect();

        let mut indexes = Vec::with_capacity(self.indexes.len() + 1);
        indexes.push(IndexDef::primary(primary_key.clone()));
        indexes.extend(self.indexes);

        let schema = ModelSchema {
            table: self.table,
            parent: self.parent,
            fields: self.fields,
            primary_key,
            indexes,
            relationships: self.relationships,
        };
        schema.check()?;
        Ok(schema)
    }
}

impl ModelSchema {
    /// Start building a schema for `table`.
    pub fn builder(table: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            table: table.into(),
            parent: None,
            fields: Vec::new(),
            indexes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Interleave parent table, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// All columns, in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Get a column by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Primary key column names, in key order.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Primary key column definitions, in key order.
    pub fn primary_key_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.primary_key.iter().filter_map(|name| self.field(name))
    }

    /// All indexes, the primary key index first.
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Get an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// All relationships, foreign keys included.
    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.relationships
    }

    /// Get a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Check internal consistency.
    ///
    /// Cross-model checks (relationship destinations, interleave parents)
    /// happen when the registry is built.
    pub fn check(&self) -> Result<(), Error> {
        if self.table.is_empty() {
            return Err(Error::InvalidSchema("table name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "table '{}' has no columns",
                self.table
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate column '{}' in table '{}'",
                    field.name, self.table
                )));
            }
            if field.primary_key && (field.nullable || !field.field_type.is_key_type()) {
                return Err(Error::InvalidSchema(format!(
                    "column '{}' cannot be part of the primary key of '{}'",
                    field.name, self.table
                )));
            }
        }

        let declared: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .collect();
        if declared.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "table '{}' has no primary key",
                self.table
            )));
        }
        if declared != self.primary_key.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(Error::InvalidSchema(format!(
                "primary key of '{}' does not follow column declaration order",
                self.table
            )));
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            if !index_names.insert(index.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate index '{}' on table '{}'",
                    index.name, self.table
                )));
            }
            for column in index.columns.iter().chain(&index.storing) {
                if self.field(column).is_none() {
                    return Err(Error::UnknownField {
                        table: self.table.clone(),
                        field: column.clone(),
                    });
                }
            }
        }
        match self.index(PRIMARY_INDEX) {
            Some(primary) if primary.columns == self.primary_key => {}
            _ => {
                return Err(Error::InvalidSchema(format!(
                    "primary key index of '{}' does not match its key columns",
                    self.table
                )))
            }
        }

        let mut relationship_names = HashSet::new();
        for relationship in &self.relationships {
            if !relationship_names.insert(relationship.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate relationship '{}' on table '{}'",
                    relationship.name, self.table
                )));
            }
            if relationship.constraints.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "relationship '{}' on '{}' has no key mapping",
                    relationship.name, self.table
                )));
            }
            for origin in relationship.origin_columns() {
                if self.field(origin).is_none() {
                    return Err(Error::UnknownField {
                        table: self.table.clone(),
                        field: origin.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// `CREATE TABLE` statement for this schema.
    pub fn create_table_ddl(&self) -> String {
        let mut columns: Vec<String> = self.fields.iter().map(FieldDef::ddl).collect();
        columns.extend(self.relationships.iter().filter_map(RelationshipDef::ddl));

        let mut ddl = format!(
            "CREATE TABLE {} ({}) PRIMARY KEY ({})",
            self.table,
            columns.join(", "),
            self.primary_key.join(", ")
        );
        if let Some(parent) = &self.parent {
            ddl.push_str(&format!(
                ", INTERLEAVE IN PARENT {} ON DELETE CASCADE",
                parent
            ));
        }
        ddl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;

    fn test_model() -> ModelSchema {
        ModelSchema::builder("test_model")
            .with_field(FieldDef::new("id", FieldType::String).primary_key())
            .with_field(FieldDef::nullable("value", FieldType::Int64))
            .build()
            .unwrap()
    }

    #[test]
    fn test_model_builder() {
        let model = test_model();
        assert_eq!(model.table(), "test_model");
        assert_eq!(model.primary_key(), &["id".to_string()]);
        assert!(model.index(PRIMARY_INDEX).is_some());
        assert!(model.field("value").unwrap().nullable);
        assert!(model.field("missing").is_none());
    }

    #[test]
    fn test_primary_key_declaration_order() {
        let model = ModelSchema::builder("child")
            .with_field(FieldDef::new("parent_id", FieldType::String).primary_key())
            .with_field(FieldDef::new("name", FieldType::String))
            .with_field(FieldDef::new("child_id", FieldType::Int64).primary_key())
            .interleaved_in("parent")
            .build()
            .unwrap();
        assert_eq!(
            model.primary_key(),
            &["parent_id".to_string(), "child_id".to_string()]
        );
    }

    #[test]
    fn test_no_primary_key() {
        let result = ModelSchema::builder("t")
            .with_field(FieldDef::new("a", FieldType::String))
            .build();
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_duplicate_column() {
        let result = ModelSchema::builder("t")
            .with_field(FieldDef::new("a", FieldType::String).primary_key())
            .with_field(FieldDef::new("a", FieldType::Int64))
            .build();
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_index_on_unknown_column() {
        let result = ModelSchema::builder("t")
            .with_field(FieldDef::new("a", FieldType::String).primary_key())
            .with_index(IndexDef::new("by_b", ["b"]))
            .build();
        assert!(matches!(result, Err(Error::UnknownField { .. })));
    }

    #[test]
    fn test_relationship_origin_must_exist() {
        let result = ModelSchema::builder("t")
            .with_field(FieldDef::new("a", FieldType::String).primary_key())
            .with_relationship(RelationshipDef::new("other", "o").on("missing", "id"))
            .build();
        assert!(matches!(result, Err(Error::UnknownField { .. })));
    }

    #[test]
    fn test_create_table_ddl() {
        let model = ModelSchema::builder("child")
            .with_field(FieldDef::new("parent_id", FieldType::String).primary_key())
            .with_field(FieldDef::new("child_id", FieldType::Int64).primary_key())
            .with_field(FieldDef::nullable("owner", FieldType::String))
            .with_relationship(RelationshipDef::foreign_key("owner_fk", "users").on("owner", "id"))
            .interleaved_in("parent")
            .build()
            .unwrap();
        assert_eq!(
            model.create_table_ddl(),
            "CREATE TABLE child (parent_id STRING(MAX) NOT NULL, child_id INT64 NOT NULL, \
             owner STRING(MAX), CONSTRAINT owner_fk FOREIGN KEY (owner) REFERENCES users (id)) \
             PRIMARY KEY (parent_id, child_id), INTERLEAVE IN PARENT parent ON DELETE CASCADE"
        );
    }
}
