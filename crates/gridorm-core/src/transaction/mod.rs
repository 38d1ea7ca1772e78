//! Transactions and the transaction runner.

mod handle;
mod runner;

pub use handle::{Mutation, Transaction, TransactionMode};
pub use runner::{TransactionRunner, WriteState};
