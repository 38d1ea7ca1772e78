//! Column type definitions for the catalog.

use serde::{Deserialize, Serialize};

/// Semantic column types supported by gridorm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Boolean value.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp (microseconds since Unix epoch, UTC).
    Timestamp,
    /// Array of UTF-8 strings.
    StringArray,
}

impl FieldType {
    /// Column type as written in DDL.
    pub fn ddl_type(&self) -> &'static str {
        match self {
            FieldType::Bool => "BOOL",
            FieldType::Int64 => "INT64",
            FieldType::Float64 => "FLOAT64",
            FieldType::String => "STRING(MAX)",
            FieldType::Bytes => "BYTES(MAX)",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::StringArray => "ARRAY<STRING(MAX)>",
        }
    }

    /// Whether values of this type can take part in a primary key.
    pub fn is_key_type(&self) -> bool {
        !matches!(self, FieldType::StringArray | FieldType::Float64)
    }
}

impl FieldType {
    /// Short type name, matching [`Value::type_name`](crate::Value::type_name).
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Bool => "BOOL",
            FieldType::Int64 => "INT64",
            FieldType::Float64 => "FLOAT64",
            FieldType::String => "STRING",
            FieldType::Bytes => "BYTES",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::StringArray => "ARRAY<STRING>",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_types() {
        assert_eq!(FieldType::String.ddl_type(), "STRING(MAX)");
        assert_eq!(FieldType::StringArray.ddl_type(), "ARRAY<STRING(MAX)>");
        assert_eq!(FieldType::Int64.to_string(), "INT64");
    }

    #[test]
    fn test_key_types() {
        assert!(FieldType::String.is_key_type());
        assert!(FieldType::Timestamp.is_key_type());
        assert!(!FieldType::StringArray.is_key_type());
    }
}
