//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use gridorm_core::{MigrationExecutor, MigrationManager, RetryPolicy, SledStore, StoreConfig};

use crate::{Args, Command};

/// Run the parsed command and return the lines to print.
pub fn run(args: &Args) -> Result<Vec<String>> {
    match &args.command {
        Command::Generate { name, directory } => generate(name, directory),
        Command::Migrate {
            instance,
            database,
            directory,
            target,
        } => {
            let executor = executor(&args.data_dir, instance, database, directory)?;
            let applied = executor.migrate(target.as_deref())?;
            Ok(report("applied", applied))
        }
        Command::Rollback {
            name,
            instance,
            database,
            directory,
        } => {
            let executor = executor(&args.data_dir, instance, database, directory)?;
            let rolled_back = executor.rollback(name)?;
            Ok(report("rolled back", rolled_back))
        }
        Command::Showmigrations {
            instance,
            database,
            directory,
        } => {
            let executor = executor(&args.data_dir, instance, database, directory)?;
            Ok(executor.show_migrations()?)
        }
    }
}

fn generate(name: &str, directory: &Path) -> Result<Vec<String>> {
    let mut manager = MigrationManager::load(directory)
        .with_context(|| format!("loading migrations from {}", directory.display()))?;
    let path = manager.generate(name)?;
    Ok(vec![format!("Created {}", path.display())])
}

/// Location of a database's files under the data directory.
pub fn database_path(data_dir: &Path, instance: &str, database: &str) -> PathBuf {
    data_dir.join(instance).join(database)
}

fn executor(data_dir: &Path, instance: &str, database: &str, directory: &Path) -> Result<MigrationExecutor> {
    let path = database_path(data_dir, instance, database);
    let store = SledStore::open(StoreConfig::new(&path))
        .with_context(|| format!("opening database at {}", path.display()))?;
    info!(instance, database, path = %path.display(), "connected");

    let manager = MigrationManager::load(directory)
        .with_context(|| format!("loading migrations from {}", directory.display()))?;
    Ok(MigrationExecutor::new(manager, Arc::new(store), RetryPolicy::default())?)
}

fn report(verb: &str, ids: Vec<String>) -> Vec<String> {
    if ids.is_empty() {
        return vec![format!("Nothing {}", verb)];
    }
    ids.into_iter().map(|id| format!("{} {}", verb, id)).collect()
}
