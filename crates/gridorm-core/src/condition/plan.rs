//! Structured query plans.

use std::sync::Arc;

use super::ops::{ComparisonOp, OrderType};
use crate::catalog::ModelSchema;
use crate::value::{Key, Value};

/// A normalized row predicate. Column names are already resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column <op> value` with a non-null value.
    Compare {
        /// Column name.
        column: String,
        /// Operator.
        op: ComparisonOp,
        /// Operand.
        value: Value,
    },
    /// `column IS NULL`.
    IsNull {
        /// Column name.
        column: String,
    },
    /// `column IS NOT NULL`.
    IsNotNull {
        /// Column name.
        column: String,
    },
    /// `column [NOT] IN (values)`.
    InList {
        /// Column name.
        column: String,
        /// Candidate values.
        values: Vec<Value>,
        /// Whether membership is negated.
        negated: bool,
    },
    /// `left = right`.
    ColumnsEqual {
        /// Left column.
        left: String,
        /// Right column.
        right: String,
    },
    /// Any branch matches; each branch is a conjunction.
    Or(Vec<Vec<Predicate>>),
    /// The tuple of `columns` equals one of `keys`.
    KeyIn {
        /// Columns forming the tuple.
        columns: Vec<String>,
        /// Candidate tuples.
        keys: Vec<Key>,
    },
}

/// Result window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    /// Maximum number of rows.
    pub limit: u64,
    /// Rows to skip.
    pub offset: u64,
}

/// One round trip to the store: a single-table read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    /// Table to read.
    pub table: String,
    /// Columns to return, in order.
    pub columns: Vec<String>,
    /// Conjunctive filters.
    pub filters: Vec<Predicate>,
    /// Sort order.
    pub order_by: Vec<(String, OrderType)>,
    /// Result window.
    pub limit: Option<Limit>,
    /// Secondary index hint.
    pub force_index: Option<String>,
}

impl ReadRequest {
    /// Read every column of `model` with no filters.
    pub fn scan(model: &ModelSchema) -> Self {
        Self {
            table: model.table().to_string(),
            columns: model.fields().iter().map(|f| f.name.clone()).collect(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            force_index: None,
        }
    }

    /// Read rows of `model` by primary key.
    pub fn by_keys(model: &ModelSchema, keys: Vec<Key>) -> Self {
        let mut request = Self::scan(model);
        request.filters.push(Predicate::KeyIn {
            columns: model.primary_key().to_vec(),
            keys,
        });
        request
    }
}

/// Eager-load directive for one relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludePlan {
    /// Relationship name, used to attach results.
    pub relationship: String,
    /// Whether at most one row may match each source row.
    pub single: bool,
    /// (source column, destination column) pairs joined on.
    ///
    /// For interleaved tables this always contains the parent's full primary
    /// key.
    pub mapping: Vec<(String, String)>,
    /// Plan over the destination model.
    pub plan: QueryPlan,
}

impl IncludePlan {
    /// Source-side join columns.
    pub fn source_columns(&self) -> Vec<String> {
        self.mapping.iter().map(|(s, _)| s.clone()).collect()
    }

    /// Destination-side join columns.
    pub fn destination_columns(&self) -> Vec<String> {
        self.mapping.iter().map(|(_, d)| d.clone()).collect()
    }
}

/// Output of the condition builder.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Model being read.
    pub model: Arc<ModelSchema>,
    /// Conjunctive filters.
    pub filters: Vec<Predicate>,
    /// Relationships to eager-load.
    pub includes: Vec<IncludePlan>,
    /// Sort order.
    pub order_by: Vec<(String, OrderType)>,
    /// Result window.
    pub limit: Option<Limit>,
    /// Secondary index hint.
    pub force_index: Option<String>,
}

impl QueryPlan {
    /// Plan that reads every row of `model`.
    pub fn all(model: Arc<ModelSchema>) -> Self {
        Self {
            model,
            filters: Vec::new(),
            includes: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            force_index: None,
        }
    }

    /// Table being read.
    pub fn table(&self) -> &str {
        self.model.table()
    }

    /// The primary read for this plan, without includes.
    pub fn read_request(&self) -> ReadRequest {
        ReadRequest {
            table: self.model.table().to_string(),
            columns: self.model.fields().iter().map(|f| f.name.clone()).collect(),
            filters: self.filters.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            force_index: self.force_index.clone(),
        }
    }
}
