//! Column definitions for models.

use serde::{Deserialize, Serialize};

use super::types::FieldType;
use crate::error::Error;
use crate::value::Value;

/// A column definition within a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub field_type: FieldType,
    /// Whether NULL is accepted.
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
}

impl FieldDef {
    /// Create a new non-nullable column.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            primary_key: false,
        }
    }

    /// Create a nullable column.
    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, field_type)
        }
    }

    /// Mark the column as part of the primary key.
    ///
    /// Key columns are never nullable.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Set nullability.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable && !self.primary_key;
        self
    }

    /// Check that `value` may be stored in this column.
    pub fn validate(&self, value: &Value) -> Result<(), Error> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(Error::NullValue {
                field: self.name.clone(),
            });
        }
        if !value.matches(self.field_type) {
            return Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type,
                found: value.type_name(),
            });
        }
        Ok(())
    }

    /// Column definition as written in DDL.
    pub fn ddl(&self) -> String {
        if self.nullable {
            format!("{} {}", self.name, self.field_type.ddl_type())
        } else {
            format!("{} {} NOT NULL", self.name, self.field_type.ddl_type())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_is_not_nullable() {
        let field = FieldDef::nullable("id", FieldType::String).primary_key();
        assert!(field.primary_key);
        assert!(!field.nullable);
    }

    #[test]
    fn test_validate() {
        let field = FieldDef::nullable("value", FieldType::Int64);
        assert!(field.validate(&Value::Int64(1)).is_ok());
        assert!(field.validate(&Value::Null).is_ok());
        assert!(matches!(
            field.validate(&Value::from("1")),
            Err(Error::TypeMismatch { .. })
        ));

        let required = FieldDef::new("name", FieldType::String);
        assert!(matches!(
            required.validate(&Value::Null),
            Err(Error::NullValue { .. })
        ));
    }

    #[test]
    fn test_ddl() {
        assert_eq!(
            FieldDef::new("id", FieldType::String).ddl(),
            "id STRING(MAX) NOT NULL"
        );
        assert_eq!(
            FieldDef::nullable("value", FieldType::Int64).ddl(),
            "value INT64"
        );
    }
}
