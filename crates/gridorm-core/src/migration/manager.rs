//! Discovery and ordering of migration files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use super::error::MigrationError;
use super::migration::Migration;

/// Default directory for migration files.
pub const DEFAULT_DIRECTORY: &str = "migrations";

/// Reads migration files from a directory and orders them into a chain.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    directory: PathBuf,
    migrations: Vec<Migration>,
}

impl MigrationManager {
    /// Load every `*.json` migration in `directory`, creating it if needed.
    pub fn load(directory: impl Into<PathBuf>) -> Result<Self, MigrationError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let mut migrations = Vec::new();
        for entry in fs::read_dir(&directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                migrations.push(Migration::load(&path)?);
            }
        }
        debug!(directory = %directory.display(), count = migrations.len(), "loaded migrations");

        Ok(Self {
            migrations: order_migrations(migrations)?,
            directory,
        })
    }

    /// Build a manager from in-memory migrations.
    pub fn from_migrations(
        directory: impl Into<PathBuf>,
        migrations: Vec<Migration>,
    ) -> Result<Self, MigrationError> {
        Ok(Self {
            directory: directory.into(),
            migrations: order_migrations(migrations)?,
        })
    }

    /// Directory migrations are read from.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Migrations in application order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Get a migration by id.
    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.id == id)
    }

    /// Write a new no-op migration that follows the current last one.
    ///
    /// Returns the path of the new file.
    pub fn generate(&mut self, name: &str) -> Result<PathBuf, MigrationError> {
        let uuid = Uuid::new_v4().simple().to_string();
        let id = uuid[uuid.len() - 12..].to_string();
        let prev_id = self.migrations.last().map(|m| m.id.clone());

        let mut migration = Migration::new(id.clone(), prev_id, name);
        migration.created_at = Some(chrono::Utc::now().format("%Y-%m-%d %H:%M").to_string());

        let path = self.directory.join(Migration::file_name(name, &id));
        migration.save(&path)?;
        info!(id = %id, path = %path.display(), "generated migration");

        self.migrations.push(migration);
        Ok(path)
    }
}

/// Order migrations by following `prev_id` links from the single root.
///
/// A root is a migration whose predecessor is absent or unknown.
fn order_migrations(migrations: Vec<Migration>) -> Result<Vec<Migration>, MigrationError> {
    if migrations.is_empty() {
        return Ok(migrations);
    }

    let mut by_id: HashMap<String, Migration> = HashMap::new();
    for migration in migrations {
        if by_id.contains_key(&migration.id) {
            return Err(MigrationError::Chain(format!(
                "duplicate migration id {}",
                migration.id
            )));
        }
        by_id.insert(migration.id.clone(), migration);
    }

    let mut next: HashMap<&str, &str> = HashMap::new();
    let mut root: Option<&str> = None;
    let mut ids: Vec<&String> = by_id.keys().collect();
    ids.sort();
    for id in ids {
        match by_id[id].prev_id.as_deref().filter(|p| by_id.contains_key(*p)) {
            Some(prev) => {
                if next.insert(prev, id.as_str()).is_some() {
                    return Err(MigrationError::Chain(format!(
                        "{} has unclear successor migration",
                        prev
                    )));
                }
            }
            None => {
                if root.is_some() {
                    return Err(MigrationError::Chain(
                        "multiple migrations have no valid previous migration".into(),
                    ));
                }
                root = Some(id.as_str());
            }
        }
    }

    let mut order: Vec<String> = Vec::with_capacity(by_id.len());
    let mut current = root
        .ok_or_else(|| MigrationError::Chain("no valid migration to start from".into()))?;
    loop {
        order.push(current.to_string());
        match next.get(current) {
            Some(id) => current = *id,
            None => break,
        }
    }

    if order.len() != by_id.len() {
        return Err(MigrationError::Chain(format!(
            "{} has no successor migration",
            current
        )));
    }

    let mut by_id = by_id;
    Ok(order
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect())
}
