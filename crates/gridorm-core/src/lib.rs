//! gridorm core - models, queries, transactions, and migrations over a
//! transactional key-ordered store.
//!
//! This crate provides the ORM layer and a sled-backed reference store.

pub mod catalog;
pub mod condition;
pub mod config;
pub mod database;
pub mod error;
pub mod migration;
pub mod model;
pub mod query;
pub mod storage;
pub mod transaction;
pub mod value;

pub use catalog::{
    FieldDef, FieldType, IndexDef, ModelBuilder, ModelSchema, Registry, RegistryBuilder,
    RelationshipDef, PRIMARY_INDEX,
};
pub use condition::{Condition, ConditionBuilder, OrderType, QueryPlan};
pub use config::{DatabaseConfig, RetryPolicy, StoreConfig, DEFAULT_MAX_ATTEMPTS};
pub use database::Database;
pub use error::{Error, Result};
pub use migration::{
    Migration, MigrationError, MigrationExecutor, MigrationManager, MigrationRecord, SchemaUpdate,
};
pub use model::{ModelInstance, Related, Table};
pub use query::QueryExecutor;
pub use storage::{Backend, DatabaseSchema, Row, SledStore};
pub use transaction::{Mutation, Transaction, TransactionMode, TransactionRunner};
pub use value::{Key, Value};
