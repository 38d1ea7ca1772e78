//! Schema updates: one DDL statement each.

use serde::{Deserialize, Serialize};

use crate::catalog::{check_key_prefix, FieldDef, IndexDef, ModelSchema, PRIMARY_INDEX};
use crate::error::Error;
use crate::storage::DatabaseSchema;

/// A single schema statement issued by a migration.
///
/// Every variant validates against the live [`DatabaseSchema`] before it is
/// executed, so an invalid update never reaches the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaUpdate {
    /// Create a table.
    CreateTable {
        /// The new table.
        table: ModelSchema,
    },
    /// Drop a table and all of its rows.
    DropTable {
        /// Table to drop.
        table: String,
    },
    /// Add a nullable, non-key column.
    AddColumn {
        /// Table to alter.
        table: String,
        /// New column.
        field: FieldDef,
    },
    /// Drop a non-key, non-indexed column.
    DropColumn {
        /// Table to alter.
        table: String,
        /// Column to drop.
        column: String,
    },
    /// Change the nullability of a column.
    AlterColumn {
        /// Table to alter.
        table: String,
        /// New column definition; only nullability may differ.
        field: FieldDef,
    },
    /// Create a secondary index.
    CreateIndex {
        /// Indexed table.
        table: String,
        /// New index.
        index: IndexDef,
    },
    /// Drop a secondary index.
    DropIndex {
        /// Indexed table.
        table: String,
        /// Index name.
        index: String,
    },
    /// Do nothing.
    #[default]
    NoUpdate,
}

fn invalid(message: String) -> Error {
    Error::InvalidSchema(message)
}

fn existing<'s>(schema: &'s DatabaseSchema, table: &str) -> Result<&'s ModelSchema, Error> {
    schema
        .table(table)
        .ok_or_else(|| invalid(format!("table '{}' does not exist", table)))
}

impl SchemaUpdate {
    /// Table affected by this update, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            SchemaUpdate::CreateTable { table } => Some(table.table()),
            SchemaUpdate::DropTable { table }
            | SchemaUpdate::AddColumn { table, .. }
            | SchemaUpdate::DropColumn { table, .. }
            | SchemaUpdate::AlterColumn { table, .. }
            | SchemaUpdate::CreateIndex { table, .. }
            | SchemaUpdate::DropIndex { table, .. } => Some(table),
            SchemaUpdate::NoUpdate => None,
        }
    }

    /// DDL text for this update. `None` for [`SchemaUpdate::NoUpdate`].
    pub fn ddl(&self) -> Option<String> {
        let ddl = match self {
            SchemaUpdate::CreateTable { table } => table.create_table_ddl(),
            SchemaUpdate::DropTable { table } => format!("DROP TABLE {}", table),
            SchemaUpdate::AddColumn { table, field } => {
                format!("ALTER TABLE {} ADD COLUMN {}", table, field.ddl())
            }
            SchemaUpdate::DropColumn { table, column } => {
                format!("ALTER TABLE {} DROP COLUMN {}", table, column)
            }
            SchemaUpdate::AlterColumn { table, field } => {
                format!("ALTER TABLE {} ALTER COLUMN {}", table, field.ddl())
            }
            SchemaUpdate::CreateIndex { table, index } => {
                let mut ddl = String::from("CREATE ");
                if index.unique {
                    ddl.push_str("UNIQUE ");
                }
                if index.null_filtered {
                    ddl.push_str("NULL_FILTERED ");
                }
                ddl.push_str(&format!(
                    "INDEX {} ON {} ({})",
                    index.name,
                    table,
                    index.columns.join(", ")
                ));
                if !index.storing.is_empty() {
                    ddl.push_str(&format!(" STORING ({})", index.storing.join(", ")));
                }
                if let Some(parent) = &index.parent {
                    ddl.push_str(&format!(", INTERLEAVE IN {}", parent));
                }
                ddl
            }
            SchemaUpdate::DropIndex { index, .. } => format!("DROP INDEX {}", index),
            SchemaUpdate::NoUpdate => return None,
        };
        Some(ddl)
    }

    /// Check that this update can be applied to `schema`.
    pub fn validate(&self, schema: &DatabaseSchema) -> Result<(), Error> {
        match self {
            SchemaUpdate::CreateTable { table } => {
                if schema.contains(table.table()) {
                    return Err(invalid(format!("table '{}' already exists", table.table())));
                }
                table.check()?;
                if let Some(parent) = table.parent() {
                    check_key_prefix(existing(schema, parent)?, table)?;
                }
                for relationship in table.relationships().iter().filter(|r| r.foreign_key) {
                    let destination = if relationship.destination == table.table() {
                        table
                    } else {
                        existing(schema, &relationship.destination)?
                    };
                    for column in relationship.destination_columns() {
                        if destination.field(column).is_none() {
                            return Err(invalid(format!(
                                "foreign key '{}' references unknown column '{}.{}'",
                                relationship.name,
                                destination.table(),
                                column
                            )));
                        }
                    }
                }
                Ok(())
            }
            SchemaUpdate::DropTable { table } => {
                let model = existing(schema, table)?;
                if let Some(child) = schema.tables().find(|t| t.parent() == Some(table.as_str())) {
                    return Err(invalid(format!(
                        "table '{}' is interleaved in '{}'",
                        child.table(),
                        table
                    )));
                }
                if let Some(index) = model.indexes().iter().find(|i| !i.is_primary()) {
                    return Err(invalid(format!(
                        "index '{}' must be dropped before table '{}'",
                        index.name, table
                    )));
                }
                let referencing = schema.tables().find(|t| {
                    t.table() != table
                        && t.relationships()
                            .iter()
                            .any(|r| r.foreign_key && r.destination == *table)
                });
                if let Some(other) = referencing {
                    return Err(invalid(format!(
                        "table '{}' has a foreign key to '{}'",
                        other.table(),
                        table
                    )));
                }
                Ok(())
            }
            SchemaUpdate::AddColumn { table, field } => {
                let model = existing(schema, table)?;
                if model.field(&field.name).is_some() {
                    return Err(invalid(format!(
                        "column '{}' already exists on '{}'",
                        field.name, table
                    )));
                }
                if field.primary_key || !field.nullable {
                    return Err(invalid(format!(
                        "added column '{}' must be nullable and not part of the key",
                        field.name
                    )));
                }
                Ok(())
            }
            SchemaUpdate::DropColumn { table, column } => {
                let model = existing(schema, table)?;
                let field = model.field(column).ok_or_else(|| Error::UnknownField {
                    table: table.clone(),
                    field: column.clone(),
                })?;
                if field.primary_key {
                    return Err(invalid(format!("cannot drop key column '{}'", column)));
                }
                if let Some(index) = model.indexes().iter().find(|i| i.covers(column)) {
                    return Err(invalid(format!(
                        "column '{}' is used by index '{}'",
                        column, index.name
                    )));
                }
                if let Some(r) = model.relationships().iter().find(|r| {
                    r.foreign_key && r.origin_columns().any(|c| c == column)
                }) {
                    return Err(invalid(format!(
                        "column '{}' is used by foreign key '{}'",
                        column, r.name
                    )));
                }
                Ok(())
            }
            SchemaUpdate::AlterColumn { table, field } => {
                let model = existing(schema, table)?;
                let current = model.field(&field.name).ok_or_else(|| Error::UnknownField {
                    table: table.clone(),
                    field: field.name.clone(),
                })?;
                if current.primary_key || field.primary_key {
                    return Err(invalid(format!("cannot alter key column '{}'", field.name)));
                }
                if current.field_type != field.field_type {
                    return Err(invalid(format!(
                        "cannot change type of '{}' from {} to {}",
                        field.name, current.field_type, field.field_type
                    )));
                }
                if current == field {
                    return Err(invalid(format!("column '{}' is unchanged", field.name)));
                }
                Ok(())
            }
            SchemaUpdate::CreateIndex { table, index } => {
                let model = existing(schema, table)?;
                if index.is_primary() || schema.find_index(&index.name).is_some() {
                    return Err(invalid(format!("index '{}' already exists", index.name)));
                }
                if index.columns.is_empty() {
                    return Err(invalid(format!("index '{}' has no columns", index.name)));
                }
                for column in index.columns.iter().chain(&index.storing) {
                    if model.field(column).is_none() {
                        return Err(Error::UnknownField {
                            table: table.clone(),
                            field: column.clone(),
                        });
                    }
                }
                if let Some(parent) = &index.parent {
                    let mut ancestor = model.parent();
                    while let Some(name) = ancestor {
                        if name == parent {
                            return Ok(());
                        }
                        ancestor = schema.table(name).and_then(ModelSchema::parent);
                    }
                    return Err(invalid(format!(
                        "index '{}' cannot be interleaved in '{}', which is not an ancestor of '{}'",
                        index.name, parent, table
                    )));
                }
                Ok(())
            }
            SchemaUpdate::DropIndex { table, index } => {
                let model = existing(schema, table)?;
                if index == PRIMARY_INDEX {
                    return Err(invalid("the primary key index cannot be dropped".into()));
                }
                if model.index(index).is_none() {
                    return Err(Error::UnknownIndex {
                        table: table.clone(),
                        index: index.clone(),
                    });
                }
                Ok(())
            }
            SchemaUpdate::NoUpdate => Ok(()),
        }
    }

    /// Apply this update to `schema`. Call [`SchemaUpdate::validate`] first.
    pub(crate) fn apply_to(&self, schema: &mut DatabaseSchema) -> Result<(), Error> {
        match self {
            SchemaUpdate::CreateTable { table } => schema.insert_table(table.clone()),
            SchemaUpdate::DropTable { table } => {
                schema.remove_table(table);
            }
            SchemaUpdate::AddColumn { table, field } => {
                schema.table_mut(table)?.fields.push(field.clone());
            }
            SchemaUpdate::DropColumn { table, column } => {
                schema.table_mut(table)?.fields.retain(|f| f.name != *column);
            }
            SchemaUpdate::AlterColumn { table, field } => {
                let model = schema.table_mut(table)?;
                if let Some(current) = model.fields.iter_mut().find(|f| f.name == field.name) {
                    *current = field.clone();
                }
            }
            SchemaUpdate::CreateIndex { table, index } => {
                schema.table_mut(table)?.indexes.push(index.clone());
            }
            SchemaUpdate::DropIndex { table, index } => {
                schema.table_mut(table)?.indexes.retain(|i| i.name != *index);
            }
            SchemaUpdate::NoUpdate => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldType, RelationshipDef};

    fn parent() -> ModelSchema {
        ModelSchema::builder("parent")
            .with_field(FieldDef::new("parent_id", FieldType::String).primary_key())
            .with_field(FieldDef::nullable("name", FieldType::String))
            .build()
            .unwrap()
    }

    fn child() -> ModelSchema {
        ModelSchema::builder("child")
            .with_field(FieldDef::new("parent_id", FieldType::String).primary_key())
            .with_field(FieldDef::new("child_id", FieldType::Int64).primary_key())
            .with_field(FieldDef::nullable("value", FieldType::Int64))
            .interleaved_in("parent")
            .build()
            .unwrap()
    }

    fn schema() -> DatabaseSchema {
        let mut schema = DatabaseSchema::default();
        for update in [
            SchemaUpdate::CreateTable { table: parent() },
            SchemaUpdate::CreateTable { table: child() },
        ] {
            update.validate(&schema).unwrap();
            update.apply_to(&mut schema).unwrap();
        }
        schema
    }

    #[test]
    fn test_create_table_requires_parent() {
        let update = SchemaUpdate::CreateTable { table: child() };
        assert!(update.validate(&DatabaseSchema::default()).is_err());
        assert!(matches!(
            SchemaUpdate::CreateTable { table: parent() }.validate(&schema()),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_create_table_foreign_key_destination() {
        let table = ModelSchema::builder("owned")
            .with_field(FieldDef::new("id", FieldType::String).primary_key())
            .with_field(FieldDef::nullable("owner", FieldType::String))
            .with_relationship(RelationshipDef::foreign_key("owner_fk", "users").on("owner", "id"))
            .build()
            .unwrap();
        let update = SchemaUpdate::CreateTable { table };
        assert!(update.validate(&schema()).is_err());
    }

    #[test]
    fn test_drop_table_with_children_fails() {
        let update = SchemaUpdate::DropTable { table: "parent".into() };
        assert!(update.validate(&schema()).is_err());

        let update = SchemaUpdate::DropTable { table: "child".into() };
        assert!(update.validate(&schema()).is_ok());
    }

    #[test]
    fn test_add_column_rules() {
        let schema = schema();
        let ok = SchemaUpdate::AddColumn {
            table: "parent".into(),
            field: FieldDef::nullable("extra", FieldType::Bool),
        };
        assert!(ok.validate(&schema).is_ok());

        let not_null = SchemaUpdate::AddColumn {
            table: "parent".into(),
            field: FieldDef::new("extra", FieldType::Bool),
        };
        assert!(not_null.validate(&schema).is_err());

        let duplicate = SchemaUpdate::AddColumn {
            table: "parent".into(),
            field: FieldDef::nullable("name", FieldType::String),
        };
        assert!(duplicate.validate(&schema).is_err());
    }

    #[test]
    fn test_drop_indexed_column_fails() {
        let mut schema = schema();
        let index = SchemaUpdate::CreateIndex {
            table: "child".into(),
            index: IndexDef::new("by_value", ["value"]).interleaved_in("parent"),
        };
        index.validate(&schema).unwrap();
        index.apply_to(&mut schema).unwrap();

        let drop = SchemaUpdate::DropColumn {
            table: "child".into(),
            column: "value".into(),
        };
        assert!(drop.validate(&schema).is_err());

        let drop_key = SchemaUpdate::DropColumn {
            table: "child".into(),
            column: "child_id".into(),
        };
        assert!(drop_key.validate(&schema).is_err());
    }

    #[test]
    fn test_alter_column_only_changes_nullability() {
        let schema = schema();
        let ok = SchemaUpdate::AlterColumn {
            table: "child".into(),
            field: FieldDef::new("value", FieldType::Int64),
        };
        assert!(ok.validate(&schema).is_ok());

        let retype = SchemaUpdate::AlterColumn {
            table: "child".into(),
            field: FieldDef::nullable("value", FieldType::String),
        };
        assert!(retype.validate(&schema).is_err());

        let unchanged = SchemaUpdate::AlterColumn {
            table: "child".into(),
            field: FieldDef::nullable("value", FieldType::Int64),
        };
        assert!(unchanged.validate(&schema).is_err());
    }

    #[test]
    fn test_index_rules() {
        let schema = schema();
        let not_ancestor = SchemaUpdate::CreateIndex {
            table: "parent".into(),
            index: IndexDef::new("by_name", ["name"]).interleaved_in("child"),
        };
        assert!(not_ancestor.validate(&schema).is_err());

        let drop_primary = SchemaUpdate::DropIndex {
            table: "parent".into(),
            index: PRIMARY_INDEX.into(),
        };
        assert!(drop_primary.validate(&schema).is_err());

        let drop_missing = SchemaUpdate::DropIndex {
            table: "parent".into(),
            index: "nope".into(),
        };
        assert!(matches!(
            drop_missing.validate(&schema),
            Err(Error::UnknownIndex { .. })
        ));
    }

    #[test]
    fn test_ddl() {
        let update = SchemaUpdate::CreateIndex {
            table: "child".into(),
            index: IndexDef::new("by_value", ["value"])
                .null_filtered()
                .storing(["child_id"])
                .interleaved_in("parent"),
        };
        assert_eq!(
            update.ddl().unwrap(),
            "CREATE NULL_FILTERED INDEX by_value ON child (value) STORING (child_id), INTERLEAVE IN parent"
        );
        assert_eq!(
            SchemaUpdate::AddColumn {
                table: "t".into(),
                field: FieldDef::nullable("c", FieldType::Int64),
            }
            .ddl()
            .unwrap(),
            "ALTER TABLE t ADD COLUMN c INT64"
        );
        assert_eq!(SchemaUpdate::NoUpdate.ddl(), None);
    }

    #[test]
    fn test_update_json_format() {
        let update = SchemaUpdate::DropColumn {
            table: "t".into(),
            column: "c".into(),
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"type":"drop_column","table":"t","column":"c"}"#);
        let back: SchemaUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }
}
