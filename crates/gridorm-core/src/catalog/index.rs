//! Index definitions.

use serde::{Deserialize, Serialize};

/// Name of the implicit primary key index.
pub const PRIMARY_INDEX: &str = "PRIMARY_KEY";

/// A secondary access path over a model.
///
/// Indexes only serve as scan hints; they never change query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Table the index is interleaved in.
    pub parent: Option<String>,
    /// Whether rows with NULL in any indexed column are skipped.
    pub null_filtered: bool,
    /// Whether indexed values must be unique.
    pub unique: bool,
    /// Extra columns stored alongside the index.
    pub storing: Vec<String>,
}

impl IndexDef {
    /// Create a new index over `columns`.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            parent: None,
            null_filtered: false,
            unique: false,
            storing: Vec::new(),
        }
    }

    /// The implicit primary key index.
    pub fn primary(columns: Vec<String>) -> Self {
        Self::new(PRIMARY_INDEX, columns)
    }

    /// Interleave the index in a parent table.
    pub fn interleaved_in(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Skip rows with NULL indexed values.
    pub fn null_filtered(mut self) -> Self {
        self.null_filtered = true;
        self
    }

    /// Require unique indexed values.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Store additional columns in the index.
    pub fn storing<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.storing = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this is the primary key index.
    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY_INDEX
    }

    /// Whether `column` is indexed or stored by this index.
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().chain(&self.storing).any(|c| c == column)
    }
}
