//! Schema migrations.
//!
//! Migrations are JSON files linked into a chain by `prev_id`. Each carries
//! one upgrade and one downgrade [`SchemaUpdate`]. Applied migrations are
//! tracked in a ledger table in the migrated database itself.

mod error;
mod executor;
mod manager;
#[allow(clippy::module_inception)]
mod migration;
mod status;
mod update;

pub use error::MigrationError;
pub use executor::MigrationExecutor;
pub use manager::{MigrationManager, DEFAULT_DIRECTORY};
pub use migration::Migration;
pub use status::{ledger_schema, Ledger, MigrationRecord, LEDGER_TABLE};
pub use update::SchemaUpdate;
