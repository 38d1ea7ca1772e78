//! Condition constructors.
//!
//! Conditions refer to columns and relationships either by name or by
//! definition; both forms are normalized by the builder before planning.

use crate::catalog::{FieldDef, RelationshipDef};
use crate::value::Value;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl ComparisonOp {
    /// Operator as written in SQL.
    pub fn sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl OrderType {
    /// Direction as written in SQL.
    pub fn sql(&self) -> &'static str {
        match self {
            OrderType::Asc => "ASC",
            OrderType::Desc => "DESC",
        }
    }
}

/// Reference to a column, by name or by definition.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRef {
    /// Column name.
    Name(String),
    /// Column definition.
    Def(FieldDef),
}

impl From<&str> for FieldRef {
    fn from(name: &str) -> Self {
        FieldRef::Name(name.to_string())
    }
}

impl From<String> for FieldRef {
    fn from(name: String) -> Self {
        FieldRef::Name(name)
    }
}

impl From<&FieldDef> for FieldRef {
    fn from(field: &FieldDef) -> Self {
        FieldRef::Def(field.clone())
    }
}

/// Reference to a relationship, by name or by definition.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationRef {
    /// Relationship name.
    Name(String),
    /// Relationship definition.
    Def(RelationshipDef),
}

impl From<&str> for RelationRef {
    fn from(name: &str) -> Self {
        RelationRef::Name(name.to_string())
    }
}

impl From<String> for RelationRef {
    fn from(name: String) -> Self {
        RelationRef::Name(name)
    }
}

impl From<&RelationshipDef> for RelationRef {
    fn from(relationship: &RelationshipDef) -> Self {
        RelationRef::Def(relationship.clone())
    }
}

/// A node in a query's condition list.
///
/// Top-level conditions are combined with AND.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field <op> value`. NULL operands are only valid for `=` and `!=`.
    Comparison {
        /// Column being compared.
        field: FieldRef,
        /// Operator.
        op: ComparisonOp,
        /// Operand.
        value: Value,
    },
    /// `field [NOT] IN (values)`.
    InList {
        /// Column being tested.
        field: FieldRef,
        /// Candidate values.
        values: Vec<Value>,
        /// Whether membership is negated.
        negated: bool,
    },
    /// `left = right` between two columns of the same row.
    ColumnsEqual {
        /// Left column.
        left: FieldRef,
        /// Right column.
        right: FieldRef,
    },
    /// Eager-load a relationship, filtering its rows by `conditions`.
    Includes {
        /// Relationship to load.
        relationship: RelationRef,
        /// Conditions on the destination model.
        conditions: Vec<Condition>,
    },
    /// Disjunction of condition lists; each list is a conjunction.
    Or(Vec<Vec<Condition>>),
    /// Result ordering.
    OrderBy(Vec<(FieldRef, OrderType)>),
    /// Result window.
    Limit {
        /// Maximum number of rows.
        limit: u64,
        /// Rows to skip.
        offset: u64,
    },
    /// Scan through a named secondary index.
    ForceIndex(String),
}

impl Condition {
    /// Whether this condition restricts rows (as opposed to shaping results).
    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            Condition::Comparison { .. }
                | Condition::InList { .. }
                | Condition::ColumnsEqual { .. }
                | Condition::Or(_)
        )
    }
}

fn comparison(field: impl Into<FieldRef>, op: ComparisonOp, value: impl Into<Value>) -> Condition {
    Condition::Comparison {
        field: field.into(),
        op,
        value: value.into(),
    }
}

/// `field = value`; a NULL value becomes `IS NULL`.
pub fn equal_to(field: impl Into<FieldRef>, value: impl Into<Value>) -> Condition {
    comparison(field, ComparisonOp::Eq, value)
}

/// `field != value`; a NULL value becomes `IS NOT NULL`.
pub fn not_equal_to(field: impl Into<FieldRef>, value: impl Into<Value>) -> Condition {
    comparison(field, ComparisonOp::Ne, value)
}

/// `field > value`.
pub fn greater_than(field: impl Into<FieldRef>, value: impl Into<Value>) -> Condition {
    comparison(field, ComparisonOp::Gt, value)
}

/// `field >= value`.
pub fn greater_than_or_equal_to(field: impl Into<FieldRef>, value: impl Into<Value>) -> Condition {
    comparison(field, ComparisonOp::Ge, value)
}

/// `field < value`.
pub fn less_than(field: impl Into<FieldRef>, value: impl Into<Value>) -> Condition {
    comparison(field, ComparisonOp::Lt, value)
}

/// `field <= value`.
pub fn less_than_or_equal_to(field: impl Into<FieldRef>, value: impl Into<Value>) -> Condition {
    comparison(field, ComparisonOp::Le, value)
}

/// Same as [`less_than_or_equal_to`].
pub fn not_greater_than(field: impl Into<FieldRef>, value: impl Into<Value>) -> Condition {
    less_than_or_equal_to(field, value)
}

/// Same as [`greater_than_or_equal_to`].
pub fn not_less_than(field: impl Into<FieldRef>, value: impl Into<Value>) -> Condition {
    greater_than_or_equal_to(field, value)
}

/// `field IN (values)`.
pub fn in_list<V: Into<Value>>(
    field: impl Into<FieldRef>,
    values: impl IntoIterator<Item = V>,
) -> Condition {
    Condition::InList {
        field: field.into(),
        values: values.into_iter().map(Into::into).collect(),
        negated: false,
    }
}

/// `field NOT IN (values)`.
pub fn not_in_list<V: Into<Value>>(
    field: impl Into<FieldRef>,
    values: impl IntoIterator<Item = V>,
) -> Condition {
    Condition::InList {
        field: field.into(),
        values: values.into_iter().map(Into::into).collect(),
        negated: true,
    }
}

/// `left = right` between two columns.
pub fn columns_equal(left: impl Into<FieldRef>, right: impl Into<FieldRef>) -> Condition {
    Condition::ColumnsEqual {
        left: left.into(),
        right: right.into(),
    }
}

/// Eager-load every related row.
pub fn includes(relationship: impl Into<RelationRef>) -> Condition {
    includes_where(relationship, Vec::new())
}

/// Eager-load related rows matching `conditions`.
pub fn includes_where(relationship: impl Into<RelationRef>, conditions: Vec<Condition>) -> Condition {
    Condition::Includes {
        relationship: relationship.into(),
        conditions,
    }
}

/// Match rows satisfying any of the condition lists.
pub fn or(branches: Vec<Vec<Condition>>) -> Condition {
    Condition::Or(branches)
}

/// Order results by one or more columns.
pub fn order_by<F: Into<FieldRef>>(orderings: impl IntoIterator<Item = (F, OrderType)>) -> Condition {
    Condition::OrderBy(
        orderings
            .into_iter()
            .map(|(field, order)| (field.into(), order))
            .collect(),
    )
}

/// Return at most `limit` rows.
pub fn limit(limit: u64) -> Condition {
    Condition::Limit { limit, offset: 0 }
}

/// Return at most `limit` rows after skipping `offset`.
pub fn limit_offset(limit: u64, offset: u64) -> Condition {
    Condition::Limit { limit, offset }
}

/// Scan through the named secondary index.
pub fn force_index(index: impl Into<String>) -> Condition {
    Condition::ForceIndex(index.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;

    #[test]
    fn test_field_ref_forms() {
        let field = FieldDef::new("id", FieldType::String);
        assert_eq!(FieldRef::from("id"), FieldRef::Name("id".into()));
        assert_eq!(FieldRef::from(&field), FieldRef::Def(field.clone()));
    }

    #[test]
    fn test_filter_classification() {
        assert!(equal_to("a", 1i64).is_filter());
        assert!(in_list("a", [1i64, 2]).is_filter());
        assert!(or(vec![vec![equal_to("a", 1i64)], vec![equal_to("a", 2i64)]]).is_filter());
        assert!(!includes("rel").is_filter());
        assert!(!limit(10).is_filter());
        assert!(!order_by([("a", OrderType::Asc)]).is_filter());
    }

    #[test]
    fn test_aliases() {
        assert_eq!(not_greater_than("a", 1i64), less_than_or_equal_to("a", 1i64));
        assert_eq!(not_less_than("a", 1i64), greater_than_or_equal_to("a", 1i64));
    }
}
