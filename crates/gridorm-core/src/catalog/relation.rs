//! Relationships between models.

use serde::{Deserialize, Serialize};

/// A directional link from one model to another.
///
/// `constraints` maps origin columns to destination columns. Foreign keys are
/// relationships that also render a `FOREIGN KEY` constraint and are always
/// single-valued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDef {
    /// Relationship name (unique within the owning model).
    pub name: String,
    /// Destination table.
    pub destination: String,
    /// Ordered (origin column, destination column) pairs.
    pub constraints: Vec<(String, String)>,
    /// Whether at most one destination row may match.
    pub single: bool,
    /// Whether the relationship is enforced as a foreign key.
    pub foreign_key: bool,
}

impl RelationshipDef {
    /// Create a many-valued relationship.
    pub fn new(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            constraints: Vec::new(),
            single: false,
            foreign_key: false,
        }
    }

    /// Create a foreign key relationship.
    pub fn foreign_key(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            single: true,
            foreign_key: true,
            ..Self::new(name, destination)
        }
    }

    /// Add an (origin column, destination column) pair.
    pub fn on(mut self, origin: impl Into<String>, destination: impl Into<String>) -> Self {
        self.constraints.push((origin.into(), destination.into()));
        self
    }

    /// Mark the relationship as single-valued.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Origin columns, in constraint order.
    pub fn origin_columns(&self) -> impl Iterator<Item = &str> {
        self.constraints.iter().map(|(o, _)| o.as_str())
    }

    /// Destination columns, in constraint order.
    pub fn destination_columns(&self) -> impl Iterator<Item = &str> {
        self.constraints.iter().map(|(_, d)| d.as_str())
    }

    /// The same link seen from the destination side.
    ///
    /// Maps destination columns back to `origin_table` and is many-valued,
    /// since several origin rows may reference one destination row.
    pub fn reversed(&self, origin_table: &str) -> Self {
        Self {
            name: self.name.clone(),
            destination: origin_table.to_string(),
            constraints: self
                .constraints
                .iter()
                .map(|(o, d)| (d.clone(), o.clone()))
                .collect(),
            single: false,
            foreign_key: false,
        }
    }

    /// Constraint clause as written in DDL, for foreign keys.
    pub fn ddl(&self) -> Option<String> {
        if !self.foreign_key {
            return None;
        }
        let origin: Vec<&str> = self.origin_columns().collect();
        let dest: Vec<&str> = self.destination_columns().collect();
        Some(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.name,
            origin.join(", "),
            self.destination,
            dest.join(", ")
        ))
    }
}
