//! Condition builder.
//!
//! Converts declarative conditions into a [`QueryPlan`]: conjunctive filters,
//! eager-load directives, ordering, and a result window.

mod builder;
mod ops;
mod plan;
mod sql;

pub use builder::{resolve_field, resolve_relationship, ConditionBuilder};
pub use ops::{
    columns_equal, equal_to, force_index, greater_than, greater_than_or_equal_to, in_list,
    includes, includes_where, less_than, less_than_or_equal_to, limit, limit_offset,
    not_equal_to, not_greater_than, not_in_list, not_less_than, or, order_by, ComparisonOp,
    Condition, FieldRef, OrderType, RelationRef,
};
pub use plan::{IncludePlan, Limit, Predicate, QueryPlan, ReadRequest};
pub use sql::SqlStatement;
