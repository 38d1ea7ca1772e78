//! Process-wide model registry.
//!
//! Relationship targets and interleave parents are resolved by table name, so
//! every model must be registered before any query is planned. The registry is
//! frozen by [`RegistryBuilder::build`] and is read-only afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use super::model::ModelSchema;
use super::relation::RelationshipDef;
use crate::error::Error;

static GLOBAL_REGISTRY: OnceLock<Arc<Registry>> = OnceLock::new();

/// Frozen set of model schemas, keyed by table name.
#[derive(Debug, Default)]
pub struct Registry {
    models: BTreeMap<String, Arc<ModelSchema>>,
}

/// Collects models before validation.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelSchema>,
}

impl RegistryBuilder {
    /// Add a model.
    pub fn register(mut self, model: ModelSchema) -> Self {
        self.models.push(model);
        self
    }

    /// Validate cross-model references and freeze the registry.
    pub fn build(self) -> Result<Registry, Error> {
        let mut models = BTreeMap::new();
        for model in self.models {
            let table = model.table().to_string();
            if models.insert(table.clone(), Arc::new(model)).is_some() {
                return Err(Error::Registry(format!(
                    "table '{}' registered twice",
                    table
                )));
            }
        }

        let registry = Registry { models };
        for model in registry.models.values() {
            registry.check_relationships(model)?;
            registry.check_interleaving(model)?;
        }
        Ok(registry)
    }
}

impl Registry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a model by table name.
    pub fn get(&self, table: &str) -> Result<Arc<ModelSchema>, Error> {
        self.models
            .get(table)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    /// Whether a table is registered.
    pub fn contains(&self, table: &str) -> bool {
        self.models.contains_key(table)
    }

    /// All registered models, ordered by table name.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.models.values()
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no models are registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Foreign keys on other models that reference `table`, with their owners.
    pub fn incoming_foreign_keys<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a Arc<ModelSchema>, &'a RelationshipDef)> + 'a {
        self.models.values().flat_map(move |owner| {
            owner
                .relationships()
                .iter()
                .filter(move |r| r.foreign_key && r.destination == table)
                .map(move |r| (owner, r))
        })
    }

    /// Install this registry as the process-wide registry.
    ///
    /// Can only happen once per process.
    pub fn install(self: Arc<Self>) -> Result<(), Error> {
        GLOBAL_REGISTRY
            .set(self)
            .map_err(|_| Error::Registry("global registry already installed".into()))
    }

    /// The process-wide registry, if one was installed.
    pub fn global() -> Option<Arc<Registry>> {
        GLOBAL_REGISTRY.get().cloned()
    }

    fn check_relationships(&self, model: &ModelSchema) -> Result<(), Error> {
        for relationship in model.relationships() {
            let destination = self.models.get(&relationship.destination).ok_or_else(|| {
                Error::Registry(format!(
                    "relationship '{}' on '{}' targets unregistered table '{}'",
                    relationship.name,
                    model.table(),
                    relationship.destination
                ))
            })?;

            for (origin, dest) in &relationship.constraints {
                let dest_field = destination.field(dest).ok_or_else(|| Error::UnknownField {
                    table: destination.table().to_string(),
                    field: dest.clone(),
                })?;
                let origin_field = model.field(origin).ok_or_else(|| Error::UnknownField {
                    table: model.table().to_string(),
                    field: origin.clone(),
                })?;
                if origin_field.field_type != dest_field.field_type {
                    return Err(Error::Registry(format!(
                        "relationship '{}' maps {} {} to {} {}",
                        relationship.name,
                        origin,
                        origin_field.field_type,
                        dest,
                        dest_field.field_type
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_interleaving(&self, model: &ModelSchema) -> Result<(), Error> {
        let Some(parent_name) = model.parent() else {
            return Ok(());
        };
        let parent = self.models.get(parent_name).ok_or_else(|| {
            Error::Registry(format!(
                "table '{}' is interleaved in unregistered table '{}'",
                model.table(),
                parent_name
            ))
        })?;

        check_key_prefix(parent, model)?;

        let mut ancestor = parent.parent();
        let mut depth = 0;
        while let Some(name) = ancestor {
            depth += 1;
            if name == model.table() || depth > self.models.len() {
                return Err(Error::Registry(format!(
                    "interleave cycle through table '{}'",
                    model.table()
                )));
            }
            ancestor = self.models.get(name).and_then(|m| m.parent());
        }
        Ok(())
    }
}

/// Check that a child's primary key begins with its parent's primary key.
pub(crate) fn check_key_prefix(parent: &ModelSchema, child: &ModelSchema) -> Result<(), Error> {
    let parent_key: Vec<_> = parent.primary_key_fields().collect();
    let child_key: Vec<_> = child.primary_key_fields().collect();
    let prefix_matches = parent_key.len() < child_key.len()
        && parent_key
            .iter()
            .zip(&child_key)
            .all(|(p, c)| p.name == c.name && p.field_type == c.field_type);
    if !prefix_matches {
        return Err(Error::InvalidSchema(format!(
            "primary key of '{}' must start with the primary key of parent '{}'",
            child.table(),
            parent.table()
        )));
    }
    Ok(())
}
