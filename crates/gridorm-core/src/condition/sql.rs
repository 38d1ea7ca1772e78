//! Parameterized SQL rendering of read requests.
//!
//! Stores that speak SQL execute these statements directly; the sled store
//! only logs them.

use super::plan::{Predicate, ReadRequest};
use crate::value::Value;

/// A SQL statement with named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// Statement text, parameters written as `@name`.
    pub sql: String,
    /// Parameter bindings, in order of appearance.
    pub params: Vec<(String, Value)>,
}

#[derive(Default)]
struct ParamWriter {
    params: Vec<(String, Value)>,
}

impl ParamWriter {
    fn bind(&mut self, column: &str, value: &Value) -> String {
        let name = format!("{}{}", column, self.params.len());
        self.params.push((name.clone(), value.clone()));
        format!("@{}", name)
    }

    fn predicate(&mut self, table: &str, predicate: &Predicate) -> String {
        match predicate {
            Predicate::Compare { column, op, value } => {
                let param = self.bind(column, value);
                format!("{}.{} {} {}", table, column, op.sql(), param)
            }
            Predicate::IsNull { column } => format!("{}.{} IS NULL", table, column),
            Predicate::IsNotNull { column } => format!("{}.{} IS NOT NULL", table, column),
            Predicate::InList {
                column,
                values,
                negated,
            } => {
                let params: Vec<String> = values.iter().map(|v| self.bind(column, v)).collect();
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{}.{} {} ({})", table, column, keyword, params.join(", "))
            }
            Predicate::ColumnsEqual { left, right } => {
                format!("{}.{} = {}.{}", table, left, table, right)
            }
            Predicate::Or(branches) => {
                let rendered: Vec<String> = branches
                    .iter()
                    .map(|branch| format!("({})", self.conjunction(table, branch)))
                    .collect();
                format!("({})", rendered.join(" OR "))
            }
            Predicate::KeyIn { columns, keys } => {
                if keys.is_empty() {
                    return "FALSE".to_string();
                }
                let rendered: Vec<String> = keys
                    .iter()
                    .map(|key| {
                        let parts: Vec<String> = columns
                            .iter()
                            .zip(key)
                            .map(|(column, value)| {
                                let param = self.bind(column, value);
                                format!("{}.{} = {}", table, column, param)
                            })
                            .collect();
                        format!("({})", parts.join(" AND "))
                    })
                    .collect();
                format!("({})", rendered.join(" OR "))
            }
        }
    }

    fn conjunction(&mut self, table: &str, predicates: &[Predicate]) -> String {
        let rendered: Vec<String> = predicates
            .iter()
            .map(|p| self.predicate(table, p))
            .collect();
        rendered.join(" AND ")
    }
}

impl ReadRequest {
    /// Render as a `SELECT` statement.
    pub fn to_sql(&self) -> SqlStatement {
        let mut writer = ParamWriter::default();
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{}.{}", self.table, c))
            .collect();

        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), self.from_clause());
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&writer.conjunction(&self.table, &self.filters));
        }
        if !self.order_by.is_empty() {
            let orderings: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, order)| format!("{}.{} {}", self.table, column, order.sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orderings.join(", "));
        }
        if let Some(limit) = self.limit {
            let limit_param = writer.bind("limit", &Value::Int64(limit.limit as i64));
            sql.push_str(&format!(" LIMIT {}", limit_param));
            if limit.offset > 0 {
                let offset_param = writer.bind("offset", &Value::Int64(limit.offset as i64));
                sql.push_str(&format!(" OFFSET {}", offset_param));
            }
        }

        SqlStatement {
            sql,
            params: writer.params,
        }
    }

    /// Render as a `SELECT COUNT(*)` statement over the same filters.
    pub fn to_count_sql(&self) -> SqlStatement {
        let mut writer = ParamWriter::default();
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.from_clause());
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&writer.conjunction(&self.table, &self.filters));
        }
        SqlStatement {
            sql,
            params: writer.params,
        }
    }

    fn from_clause(&self) -> String {
        match &self.force_index {
            Some(index) => format!("{}@{{FORCE_INDEX={}}}", self.table, index),
            None => self.table.clone(),
        }
    }
}
