//! Predicate evaluation over stored rows.
//!
//! Follows SQL semantics: any comparison against NULL is false, so NULL
//! columns match neither `=`/`!=` nor `IN`/`NOT IN`.

use std::cmp::Ordering;

use crate::condition::{ComparisonOp, OrderType, Predicate};
use crate::storage::Row;
use crate::value::Value;

/// Evaluates predicates against rows.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Whether `row` satisfies every predicate.
    pub fn matches_all(filters: &[Predicate], row: &Row) -> bool {
        filters.iter().all(|f| Self::evaluate(f, row))
    }

    /// Whether `row` satisfies `predicate`.
    pub fn evaluate(predicate: &Predicate, row: &Row) -> bool {
        match predicate {
            Predicate::Compare { column, op, value } => {
                match Self::get_field_value(row, column) {
                    Some(field_value) if !field_value.is_null() => {
                        Self::compare_op(field_value, *op, value)
                    }
                    _ => false,
                }
            }
            Predicate::IsNull { column } => {
                matches!(Self::get_field_value(row, column), None | Some(Value::Null))
            }
            Predicate::IsNotNull { column } => {
                !matches!(Self::get_field_value(row, column), None | Some(Value::Null))
            }
            Predicate::InList {
                column,
                values,
                negated,
            } => match Self::get_field_value(row, column) {
                Some(fv) if !fv.is_null() => {
                    values.iter().any(|v| Self::values_equal(fv, v)) != *negated
                }
                _ => false,
            },
            Predicate::ColumnsEqual { left, right } => {
                match (Self::get_field_value(row, left), Self::get_field_value(row, right)) {
                    (Some(a), Some(b)) if !a.is_null() && !b.is_null() => Self::values_equal(a, b),
                    _ => false,
                }
            }
            Predicate::Or(branches) => branches
                .iter()
                .any(|branch| Self::matches_all(branch, row)),
            Predicate::KeyIn { columns, keys } => keys.iter().any(|key| {
                columns.iter().zip(key).all(|(column, expected)| {
                    Self::get_field_value(row, column)
                        .map(|v| Self::values_equal(v, expected))
                        .unwrap_or(false)
                })
            }),
        }
    }

    /// Get a column value from a row by name.
    pub fn get_field_value<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
        row.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    fn compare_op(a: &Value, op: ComparisonOp, b: &Value) -> bool {
        match op {
            ComparisonOp::Eq => Self::values_equal(a, b),
            ComparisonOp::Ne => !Self::values_equal(a, b),
            ComparisonOp::Gt => Self::compare_values(a, b).is_some_and(|o| o.is_gt()),
            ComparisonOp::Ge => Self::compare_values(a, b).is_some_and(|o| o.is_ge()),
            ComparisonOp::Lt => Self::compare_values(a, b).is_some_and(|o| o.is_lt()),
            ComparisonOp::Le => Self::compare_values(a, b).is_some_and(|o| o.is_le()),
        }
    }

    /// Check if two non-null values are equal.
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::StringArray(a), Value::StringArray(b)) => a == b,
            _ => false,
        }
    }

    /// Compare two values, returning their ordering if comparable.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::StringArray(a), Value::StringArray(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for `ORDER BY`; NULL sorts first when ascending.
    pub fn order_rows(a: &Row, b: &Row, order_by: &[(String, OrderType)]) -> Ordering {
        for (column, order) in order_by {
            let left = Self::get_field_value(a, column).unwrap_or(&Value::Null);
            let right = Self::get_field_value(b, column).unwrap_or(&Value::Null);
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => Self::compare_values(left, right).unwrap_or(Ordering::Equal),
            };
            let ordering = match order {
                OrderType::Asc => ordering,
                OrderType::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_row(fields: Vec<(&str, Value)>) -> Row {
        fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect()
    }

    #[test]
    fn test_compare_predicates() {
        let row = make_row(vec![("id", Value::from("a")), ("value", Value::Int64(1))]);

        let gt = Predicate::Compare {
            column: "value".into(),
            op: ComparisonOp::Gt,
            value: Value::Int64(0),
        };
        assert!(FilterEvaluator::evaluate(&gt, &row));

        let eq = Predicate::Compare {
            column: "id".into(),
            op: ComparisonOp::Eq,
            value: Value::from("b"),
        };
        assert!(!FilterEvaluator::evaluate(&eq, &row));
    }

    #[test]
    fn test_null_semantics() {
        let row = make_row(vec![("id", Value::from("a")), ("value", Value::Null)]);

        let ne = Predicate::Compare {
            column: "value".into(),
            op: ComparisonOp::Ne,
            value: Value::Int64(3),
        };
        assert!(!FilterEvaluator::evaluate(&ne, &row));

        let not_in = Predicate::InList {
            column: "value".into(),
            values: vec![Value::Int64(3)],
            negated: true,
        };
        assert!(!FilterEvaluator::evaluate(&not_in, &row));

        assert!(FilterEvaluator::evaluate(
            &Predicate::IsNull { column: "value".into() },
            &row
        ));
    }

    #[test]
    fn test_or_and_key_in() {
        let row = make_row(vec![("a", Value::Int64(1)), ("b", Value::from("x"))]);

        let or = Predicate::Or(vec![
            vec![Predicate::IsNull { column: "a".into() }],
            vec![Predicate::Compare {
                column: "b".into(),
                op: ComparisonOp::Eq,
                value: Value::from("x"),
            }],
        ]);
        assert!(FilterEvaluator::evaluate(&or, &row));

        let key_in = Predicate::KeyIn {
            columns: vec!["a".into(), "b".into()],
            keys: vec![
                vec![Value::Int64(2), Value::from("x")],
                vec![Value::Int64(1), Value::from("x")],
            ],
        };
        assert!(FilterEvaluator::evaluate(&key_in, &row));
    }

    #[test]
    fn test_order_rows() {
        let a = make_row(vec![("v", Value::Int64(1))]);
        let b = make_row(vec![("v", Value::Null)]);
        let asc = vec![("v".to_string(), OrderType::Asc)];
        let desc = vec![("v".to_string(), OrderType::Desc)];
        assert_eq!(FilterEvaluator::order_rows(&b, &a, &asc), Ordering::Less);
        assert_eq!(FilterEvaluator::order_rows(&b, &a, &desc), Ordering::Greater);
    }
}
