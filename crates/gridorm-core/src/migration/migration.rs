//! Migration definitions.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::MigrationError;
use super::update::SchemaUpdate;

/// One step of the schema history.
///
/// Stored as a JSON file named `{name}_{id}.json`. Migrations form a chain
/// through `prev_id`; the first migration has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Unique migration id.
    pub id: String,
    /// Id of the migration this one follows.
    pub prev_id: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Creation time, informational only.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Statement applied by `migrate`.
    #[serde(default)]
    pub upgrade: SchemaUpdate,
    /// Statement applied by `rollback`.
    #[serde(default)]
    pub downgrade: SchemaUpdate,
}

impl Migration {
    /// Create a migration with no-op upgrade and downgrade.
    pub fn new(id: impl Into<String>, prev_id: Option<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prev_id,
            description: description.into(),
            created_at: None,
            upgrade: SchemaUpdate::NoUpdate,
            downgrade: SchemaUpdate::NoUpdate,
        }
    }

    /// Set the upgrade statement.
    pub fn with_upgrade(mut self, update: SchemaUpdate) -> Self {
        self.upgrade = update;
        self
    }

    /// Set the downgrade statement.
    pub fn with_downgrade(mut self, update: SchemaUpdate) -> Self {
        self.downgrade = update;
        self
    }

    /// Load a migration file.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write the migration to `path` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), MigrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// File name for a migration called `name`.
    pub fn file_name(name: &str, id: &str) -> String {
        let name: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("{}_{}.json", name, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(
            Migration::file_name("add users-table", "abc123"),
            "add_users_table_abc123.json"
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let migration = Migration::new("abc", None, "first").with_downgrade(SchemaUpdate::DropTable {
            table: "t".into(),
        });
        migration.save(&path).unwrap();
        assert_eq!(Migration::load(&path).unwrap(), migration);
    }

    #[test]
    fn test_missing_updates_default_to_no_update() {
        let migration: Migration =
            serde_json::from_str(r#"{"id":"a","prev_id":null}"#).unwrap();
        assert_eq!(migration.upgrade, SchemaUpdate::NoUpdate);
        assert_eq!(migration.downgrade, SchemaUpdate::NoUpdate);
    }
}
