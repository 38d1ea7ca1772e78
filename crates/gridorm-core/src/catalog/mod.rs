//! Schema catalog for gridorm.
//!
//! Describes tables as immutable [`ModelSchema`] values and resolves names
//! across models through the [`Registry`].

mod field;
mod index;
mod model;
mod registry;
mod relation;
mod types;

pub use field::FieldDef;
pub use index::{IndexDef, PRIMARY_INDEX};
pub use model::{ModelBuilder, ModelSchema};
pub use registry::{Registry, RegistryBuilder};
pub use relation::RelationshipDef;
pub use types::FieldType;

pub(crate) use registry::check_key_prefix;
