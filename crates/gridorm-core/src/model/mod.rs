//! Model instances and their persistence API.

mod instance;
mod table;

pub use instance::{ModelInstance, Related};
pub use table::Table;
