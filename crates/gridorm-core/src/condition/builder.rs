//! Condition normalization and plan building.

use std::sync::Arc;

use tracing::debug;

use super::ops::{ComparisonOp, Condition, FieldRef, OrderType, RelationRef};
use super::plan::{IncludePlan, Limit, Predicate, QueryPlan};
use crate::catalog::{FieldDef, ModelSchema, Registry, RelationshipDef};
use crate::error::Error;
use crate::value::Value;

/// Resolve a column reference against `model`.
///
/// Names and definitions both normalize here. A definition must be identical
/// to the model's own column of that name.
pub fn resolve_field<'m>(model: &'m ModelSchema, field: &FieldRef) -> Result<&'m FieldDef, Error> {
    let (name, expected) = match field {
        FieldRef::Name(name) => (name.as_str(), None),
        FieldRef::Def(def) => (def.name.as_str(), Some(def)),
    };
    let resolved = model.field(name).ok_or_else(|| Error::UnknownField {
        table: model.table().to_string(),
        field: name.to_string(),
    })?;
    match expected {
        Some(def) if def != resolved => Err(Error::UnknownField {
            table: model.table().to_string(),
            field: name.to_string(),
        }),
        _ => Ok(resolved),
    }
}

/// Resolve a relationship reference against `model`.
pub fn resolve_relationship<'m>(
    model: &'m ModelSchema,
    relationship: &RelationRef,
) -> Result<&'m RelationshipDef, Error> {
    let (name, expected) = match relationship {
        RelationRef::Name(name) => (name.as_str(), None),
        RelationRef::Def(def) => (def.name.as_str(), Some(def)),
    };
    let unknown = || Error::UnknownRelationship {
        table: model.table().to_string(),
        relationship: name.to_string(),
    };
    let resolved = model.relationship(name).ok_or_else(unknown)?;
    match expected {
        Some(def) if def != resolved => Err(unknown()),
        _ => Ok(resolved),
    }
}

fn check_operand(field: &FieldDef, value: &Value) -> Result<(), Error> {
    if value.is_null() {
        return Err(Error::MalformedCondition(format!(
            "NULL operand for '{}' is only valid with equality",
            field.name
        )));
    }
    if !value.matches(field.field_type) {
        return Err(Error::TypeMismatch {
            field: field.name.clone(),
            expected: field.field_type,
            found: value.type_name(),
        });
    }
    Ok(())
}

/// Turns condition lists into [`QueryPlan`]s.
///
/// Every name is resolved and every operand type-checked here, so invalid
/// conditions never reach the store.
pub struct ConditionBuilder<'r> {
    registry: &'r Registry,
}

impl<'r> ConditionBuilder<'r> {
    /// Create a builder resolving relationships through `registry`.
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Build a select plan.
    pub fn build(&self, model: &Arc<ModelSchema>, conditions: &[Condition]) -> Result<QueryPlan, Error> {
        let mut plan = QueryPlan::all(model.clone());
        let mut ordered = false;

        for condition in conditions {
            match condition {
                Condition::Includes {
                    relationship,
                    conditions,
                } => {
                    let include = self.include(model, relationship, conditions)?;
                    if plan.includes.iter().any(|i| i.relationship == include.relationship) {
                        return Err(Error::MalformedCondition(format!(
                            "relationship '{}' included twice",
                            include.relationship
                        )));
                    }
                    plan.includes.push(include);
                }
                Condition::OrderBy(orderings) => {
                    if ordered {
                        return Err(Error::MalformedCondition(
                            "only one order_by condition is allowed".into(),
                        ));
                    }
                    ordered = true;
                    plan.order_by = self.order_by(model, orderings)?;
                }
                Condition::Limit { limit, offset } => {
                    if plan.limit.is_some() {
                        return Err(Error::MalformedCondition(
                            "only one limit condition is allowed".into(),
                        ));
                    }
                    plan.limit = Some(Limit {
                        limit: *limit,
                        offset: *offset,
                    });
                }
                Condition::ForceIndex(index) => {
                    if plan.force_index.is_some() {
                        return Err(Error::MalformedCondition(
                            "only one force_index condition is allowed".into(),
                        ));
                    }
                    if model.index(index).is_none() {
                        return Err(Error::UnknownIndex {
                            table: model.table().to_string(),
                            index: index.clone(),
                        });
                    }
                    plan.force_index = Some(index.clone());
                }
                filter => plan.filters.push(self.predicate(model, filter)?),
            }
        }

        debug!(
            table = %model.table(),
            filters = plan.filters.len(),
            includes = plan.includes.len(),
            "built query plan"
        );
        Ok(plan)
    }

    /// Build a count plan. Only filter conditions are accepted.
    pub fn build_count(
        &self,
        model: &Arc<ModelSchema>,
        conditions: &[Condition],
    ) -> Result<QueryPlan, Error> {
        if let Some(other) = conditions.iter().find(|c| !c.is_filter()) {
            return Err(Error::MalformedCondition(format!(
                "count only accepts filter conditions, got {:?}",
                other
            )));
        }
        self.build(model, conditions)
    }

    fn predicate(&self, model: &ModelSchema, condition: &Condition) -> Result<Predicate, Error> {
        match condition {
            Condition::Comparison { field, op, value } => {
                let field = resolve_field(model, field)?;
                let column = field.name.clone();
                match (op, value.is_null()) {
                    (ComparisonOp::Eq, true) => Ok(Predicate::IsNull { column }),
                    (ComparisonOp::Ne, true) => Ok(Predicate::IsNotNull { column }),
                    _ => {
                        check_operand(field, value)?;
                        Ok(Predicate::Compare {
                            column,
                            op: *op,
                            value: value.clone(),
                        })
                    }
                }
            }
            Condition::InList {
                field,
                values,
                negated,
            } => {
                let field = resolve_field(model, field)?;
                for value in values {
                    check_operand(field, value)?;
                }
                Ok(Predicate::InList {
                    column: field.name.clone(),
                    values: values.clone(),
                    negated: *negated,
                })
            }
            Condition::ColumnsEqual { left, right } => {
                let left = resolve_field(model, left)?;
                let right = resolve_field(model, right)?;
                if left.field_type != right.field_type {
                    return Err(Error::TypeMismatch {
                        field: right.name.clone(),
                        expected: left.field_type,
                        found: right.field_type.name(),
                    });
                }
                Ok(Predicate::ColumnsEqual {
                    left: left.name.clone(),
                    right: right.name.clone(),
                })
            }
            Condition::Or(branches) => {
                if branches.len() < 2 {
                    return Err(Error::MalformedCondition(
                        "or requires at least two condition lists".into(),
                    ));
                }
                let mut resolved = Vec::with_capacity(branches.len());
                for branch in branches {
                    if branch.is_empty() {
                        return Err(Error::MalformedCondition(
                            "or branches cannot be empty".into(),
                        ));
                    }
                    let mut predicates = Vec::with_capacity(branch.len());
                    for condition in branch {
                        if !condition.is_filter() {
                            return Err(Error::MalformedCondition(format!(
                                "or only accepts filter conditions, got {:?}",
                                condition
                            )));
                        }
                        predicates.push(self.predicate(model, condition)?);
                    }
                    resolved.push(predicates);
                }
                Ok(Predicate::Or(resolved))
            }
            other => Err(Error::MalformedCondition(format!(
                "{:?} is not a filter condition",
                other
            ))),
        }
    }

    fn order_by(
        &self,
        model: &ModelSchema,
        orderings: &[(FieldRef, OrderType)],
    ) -> Result<Vec<(String, OrderType)>, Error> {
        if orderings.is_empty() {
            return Err(Error::MalformedCondition("order_by needs at least one column".into()));
        }
        orderings
            .iter()
            .map(|(field, order)| Ok((resolve_field(model, field)?.name.clone(), *order)))
            .collect()
    }

    fn include(
        &self,
        model: &ModelSchema,
        relationship: &RelationRef,
        conditions: &[Condition],
    ) -> Result<IncludePlan, Error> {
        let relationship = match resolve_relationship(model, relationship) {
            Ok(local) => local.clone(),
            Err(err) => self.incoming_foreign_key(model, relationship)?.ok_or(err)?,
        };
        let destination = self.registry.get(&relationship.destination)?;
        let mut mapping = relationship.constraints.clone();

        // Interleaved rows share the parent's key prefix; join on all of it.
        let shared_key = if destination.parent() == Some(model.table()) {
            Some(model.primary_key())
        } else if model.parent() == Some(destination.table()) {
            Some(destination.primary_key())
        } else {
            None
        };
        if let Some(shared_key) = shared_key {
            for column in shared_key {
                if !mapping.iter().any(|(s, d)| s == column && d == column) {
                    mapping.push((column.clone(), column.clone()));
                }
            }
        }

        let plan = self.build(&destination, conditions)?;
        Ok(IncludePlan {
            relationship: relationship.name.clone(),
            single: relationship.single,
            mapping,
            plan,
        })
    }
}

impl ConditionBuilder<'_> {
    /// Find a foreign key declared on another model that references `model`,
    /// reversed so it can be included from the referenced side.
    fn incoming_foreign_key(
        &self,
        model: &ModelSchema,
        relationship: &RelationRef,
    ) -> Result<Option<RelationshipDef>, Error> {
        let (name, expected) = match relationship {
            RelationRef::Name(name) => (name.as_str(), None),
            RelationRef::Def(def) => (def.name.as_str(), Some(def)),
        };

        let mut found: Option<RelationshipDef> = None;
        for (owner, fk) in self.registry.incoming_foreign_keys(model.table()) {
            if fk.name != name || expected.is_some_and(|def| def != fk) {
                continue;
            }
            if let Some(previous) = &found {
                return Err(Error::MalformedCondition(format!(
                    "foreign key '{}' into '{}' is declared on both '{}' and '{}'",
                    name,
                    model.table(),
                    previous.destination,
                    owner.table()
                )));
            }
            found = Some(fk.reversed(owner.table()));
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldType, IndexDef};
    use crate::condition::{
        columns_equal, equal_to, force_index, greater_than, in_list, includes, includes_where,
        limit, not_equal_to, or, order_by,
    };

    fn registry() -> Registry {
        let parent = ModelSchema::builder("parent")
            .with_field(FieldDef::new("parent_id", FieldType::String).primary_key())
            .with_field(FieldDef::nullable("name", FieldType::String))
            .with_relationship(RelationshipDef::new("children", "child").on("parent_id", "parent_id"))
            .with_relationship(RelationshipDef::new("labelled", "child").on("name", "label"))
            .build()
            .unwrap();
        let child = ModelSchema::builder("child")
            .with_field(FieldDef::new("parent_id", FieldType::String).primary_key())
            .with_field(FieldDef::new("child_id", FieldType::Int64).primary_key())
            .with_field(FieldDef::nullable("value", FieldType::Int64))
            .with_field(FieldDef::nullable("other", FieldType::Int64))
            .with_field(FieldDef::nullable("label", FieldType::String))
            .with_index(IndexDef::new("by_value", ["value"]))
            .with_relationship(RelationshipDef::new("siblings", "child").on("value", "value"))
            .with_relationship(RelationshipDef::foreign_key("owner", "parent").on("parent_id", "parent_id"))
            .interleaved_in("parent")
            .build()
            .unwrap();
        Registry::builder().register(parent).register(child).build().unwrap()
    }

    #[test]
    fn test_name_and_definition_resolve_identically() {
        let registry = registry();
        let model = registry.get("child").unwrap();
        let builder = ConditionBuilder::new(&registry);

        let by_name = builder.build(&model, &[greater_than("value", 0i64)]).unwrap();
        let field = model.field("value").unwrap();
        let by_def = builder.build(&model, &[greater_than(field, 0i64)]).unwrap();
        assert_eq!(by_name.filters, by_def.filters);
    }

    #[test]
    fn test_unknown_field() {
        let registry = registry();
        let model = registry.get("child").unwrap();
        let builder = ConditionBuilder::new(&registry);
        let err = builder.build(&model, &[equal_to("valu", 1i64)]).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));

        let foreign = FieldDef::new("value", FieldType::String);
        let err = builder.build(&model, &[equal_to(&foreign, "x")]).unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
    }

    #[test]
    fn test_type_mismatch() {
        let registry = registry();
        let model = registry.get("child").unwrap();
        let builder = ConditionBuilder::new(&registry);
        let err = builder.build(&model, &[greater_than("value", "1")]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        let err = builder.build(&model, &[in_list("value", ["a"])]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        let err = builder
            .build(&model, &[columns_equal("value", "parent_id")])
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_null_equality() {
        let registry = registry();
        let model = registry.get("child").unwrap();
        let builder = ConditionBuilder::new(&registry);
        let plan = builder
            .build(
                &model,
                &[equal_to("value", Value::Null), not_equal_to("other", Value::Null)],
            )
            .unwrap();
        assert_eq!(
            plan.filters,
            vec![
                Predicate::IsNull { column: "value".into() },
                Predicate::IsNotNull { column: "other".into() },
            ]
        );

        let err = builder
            .build(&model, &[greater_than("value", Value::Null)])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedCondition(_)));
    }

    #[test]
    fn test_malformed_conditions() {
        let registry = registry();
        let model = registry.get("child").unwrap();
        let builder = ConditionBuilder::new(&registry);

        let single_branch = or(vec![vec![equal_to("value", 1i64)]]);
        assert!(matches!(
            builder.build(&model, &[single_branch]),
            Err(Error::MalformedCondition(_))
        ));
        assert!(matches!(
            builder.build(&model, &[limit(1), limit(2)]),
            Err(Error::MalformedCondition(_))
        ));
        assert!(matches!(
            builder.build(&model, &[force_index("missing")]),
            Err(Error::UnknownIndex { .. })
        ));
        assert!(matches!(
            builder.build_count(&model, &[limit(1)]),
            Err(Error::MalformedCondition(_))
        ));
    }

    #[test]
    fn test_shaping_conditions() {
        let registry = registry();
        let model = registry.get("child").unwrap();
        let builder = ConditionBuilder::new(&registry);
        let plan = builder
            .build(
                &model,
                &[
                    order_by([("value", OrderType::Desc)]),
                    limit(3),
                    force_index("by_value"),
                ],
            )
            .unwrap();
        assert_eq!(plan.order_by, vec![("value".to_string(), OrderType::Desc)]);
        assert_eq!(plan.limit, Some(Limit { limit: 3, offset: 0 }));
        assert_eq!(plan.force_index.as_deref(), Some("by_value"));
    }

    #[test]
    fn test_unknown_relationship() {
        let registry = registry();
        let model = registry.get("parent").unwrap();
        let builder = ConditionBuilder::new(&registry);
        let err = builder.build(&model, &[includes("kids")]).unwrap_err();
        assert!(matches!(err, Error::UnknownRelationship { .. }));
    }

    #[test]
    fn test_foreign_key_included_from_referenced_side() {
        let registry = registry();
        let builder = ConditionBuilder::new(&registry);
        let parent = registry.get("parent").unwrap();

        let plan = builder.build(&parent, &[includes("owner")]).unwrap();
        let include = &plan.includes[0];
        assert_eq!(include.relationship, "owner");
        assert_eq!(include.plan.model.table(), "child");
        assert_eq!(
            include.mapping,
            vec![("parent_id".to_string(), "parent_id".to_string())]
        );
        assert!(!include.single);

        let child = registry.get("child").unwrap();
        let fk = child.relationship("owner").unwrap();
        let by_def = builder.build(&parent, &[includes(fk)]).unwrap();
        assert_eq!(by_def.includes[0].mapping, include.mapping);

        // Only foreign keys are visible from the other side.
        let err = builder.build(&parent, &[includes("siblings")]).unwrap_err();
        assert!(matches!(err, Error::UnknownRelationship { .. }));
    }

    #[test]
    fn test_include_conditions_validated_on_destination() {
        let registry = registry();
        let model = registry.get("parent").unwrap();
        let builder = ConditionBuilder::new(&registry);
        let err = builder
            .build(&model, &[includes_where("children", vec![equal_to("name", "x")])])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownField { .. }));
    }

    #[test]
    fn test_interleaved_include_keeps_parent_prefix() {
        let registry = registry();
        let builder = ConditionBuilder::new(&registry);

        // labelled joins on name only; the parent key prefix is added.
        let parent = registry.get("parent").unwrap();
        let plan = builder.build(&parent, &[includes("labelled")]).unwrap();
        assert_eq!(
            plan.includes[0].mapping,
            vec![
                ("name".to_string(), "label".to_string()),
                ("parent_id".to_string(), "parent_id".to_string()),
            ]
        );
        assert!(!plan.includes[0].single);

        let plan = builder.build(&parent, &[includes("children")]).unwrap();
        assert_eq!(plan.includes[0].mapping.len(), 1);

        let child = registry.get("child").unwrap();
        let plan = builder.build(&child, &[includes("owner")]).unwrap();
        assert_eq!(
            plan.includes[0].mapping,
            vec![("parent_id".to_string(), "parent_id".to_string())]
        );
        assert!(plan.includes[0].single);

        let plan = builder.build(&child, &[includes("siblings")]).unwrap();
        assert_eq!(plan.includes[0].mapping.len(), 1);
    }
}
