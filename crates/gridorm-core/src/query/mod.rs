//! Query execution: filtering, sorting, and batched includes.

mod executor;
mod filter;
mod join;

pub use executor::{check_key, QueryExecutor};
pub use filter::FilterEvaluator;
pub use join::HashJoinExecutor;
