//! Batched resolution of relationship includes.
//!
//! Each include costs exactly one read, whatever the number of source rows:
//! 1. Build phase: collect the distinct join keys of the source rows and read
//!    every matching destination row in one `KeyIn` request.
//! 2. Probe phase: group destination rows by join key and hand each source row
//!    its group.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::condition::{IncludePlan, Predicate};
use crate::error::Error;
use crate::model::{ModelInstance, Related};
use crate::storage::{encode_key, Backend};
use crate::transaction::Transaction;
use crate::value::{Key, Value};

/// Hash join executor for relationship includes.
pub struct HashJoinExecutor;

impl HashJoinExecutor {
    /// Resolve every include of `includes` onto `sources`, recursively.
    pub fn attach_all(
        backend: &dyn Backend,
        txn: &mut Transaction,
        sources: &mut [ModelInstance],
        includes: &[IncludePlan],
    ) -> Result<(), Error> {
        for include in includes {
            Self::attach(backend, txn, sources, include)?;
        }
        Ok(())
    }

    /// Resolve one include onto `sources`.
    ///
    /// Source rows with a NULL in any join column match nothing. When no
    /// source row has a usable key no read is issued at all.
    pub fn attach(
        backend: &dyn Backend,
        txn: &mut Transaction,
        sources: &mut [ModelInstance],
        include: &IncludePlan,
    ) -> Result<(), Error> {
        let source_columns = include.source_columns();

        let mut seen = HashSet::new();
        let mut keys: Vec<Key> = Vec::new();
        for source in sources.iter() {
            if let Some(key) = join_key(source, &source_columns) {
                if seen.insert(encode_key(&key)) {
                    keys.push(key);
                }
            }
        }

        if keys.is_empty() {
            for source in sources.iter_mut() {
                source.attach(&include.relationship, empty(include));
            }
            return Ok(());
        }

        // Build phase
        let destination_columns = include.destination_columns();
        let mut request = include.plan.read_request();
        request.limit = None;
        request.filters.push(Predicate::KeyIn {
            columns: destination_columns.clone(),
            keys,
        });
        debug!(
            relationship = %include.relationship,
            table = %request.table,
            keys = seen.len(),
            "resolving include"
        );

        let rows = backend.execute_query(txn, &request)?;
        let schema = include.plan.model.clone();
        let mut related = rows
            .into_iter()
            .map(|row| ModelInstance::from_row(schema.clone(), row))
            .collect::<Result<Vec<_>, _>>()?;
        Self::attach_all(backend, txn, &mut related, &include.plan.includes)?;

        let mut groups: HashMap<Vec<u8>, Vec<ModelInstance>> = HashMap::new();
        for row in related {
            if let Some(key) = join_key(&row, &destination_columns) {
                groups.entry(encode_key(&key)).or_default().push(row);
            }
        }

        // Probe phase
        for source in sources.iter_mut() {
            let mut matched = join_key(source, &source_columns)
                .and_then(|key| groups.get(&encode_key(&key)).cloned())
                .unwrap_or_default();

            if let Some(window) = include.plan.limit {
                matched = matched
                    .into_iter()
                    .skip(window.offset as usize)
                    .take(window.limit as usize)
                    .collect();
            }

            let result = if include.single {
                if matched.len() > 1 {
                    return Err(Error::MultipleRelated {
                        relationship: include.relationship.clone(),
                        count: matched.len(),
                    });
                }
                Related::Single(matched.pop())
            } else {
                Related::Many(matched)
            };
            source.attach(&include.relationship, result);
        }

        Ok(())
    }
}

fn empty(include: &IncludePlan) -> Related {
    if include.single {
        Related::Single(None)
    } else {
        Related::Many(Vec::new())
    }
}

/// Join key of `row` over `columns`, or `None` if any column is NULL.
fn join_key(row: &ModelInstance, columns: &[String]) -> Option<Key> {
    columns
        .iter()
        .map(|column| match row.get(column) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value.clone()),
        })
        .collect()
}
