//! Storage boundary and the sled-backed reference store.

mod backend;
mod key;
mod record;
mod schema;
mod store;

pub use backend::{Backend, Row};
pub use key::{current_timestamp, encode_key};
pub use record::StoredRow;
pub use schema::DatabaseSchema;
pub use store::SledStore;
