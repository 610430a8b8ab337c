//! Entity-type descriptors and the catalog that supplies them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{DedupeError, Result};

/// Uniqueness rules for one entity type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityTypeDescriptor {
    /// Entity-type tag.
    pub name: String,
    /// Key property names in declared order.
    pub key_properties: Vec<String>,
    /// Parent types this type depends on for uniqueness.
    pub dependent_on: Vec<String>,
    /// Human-readable name property, if any.
    pub display_name_property: Option<String>,
}

impl EntityTypeDescriptor {
    /// Descriptor for a globally unique type.
    pub fn new<I, S>(name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            key_properties: keys.into_iter().map(Into::into).collect(),
            dependent_on: Vec::new(),
            display_name_property: None,
        }
    }

    /// Declares the parent types this type is unique within.
    pub fn dependent_on<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependent_on = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Declares the display-name property.
    pub fn display_name(mut self, property: impl Into<String>) -> Self {
        self.display_name_property = Some(property.into());
        self
    }

    /// Whether key uniqueness is only meaningful within one parent.
    pub fn is_dependent(&self) -> bool {
        !self.dependent_on.is_empty()
    }

    /// Whether `entity_type` is one of the declared parent types.
    pub fn is_parent_type(&self, entity_type: &str) -> bool {
        self.dependent_on.iter().any(|parent| parent == entity_type)
    }

    /// Name of the identifying index rebuilt after deletions.
    pub fn index_name(&self) -> String {
        format!("{}-id", self.name)
    }
}

/// Source of entity-type descriptors.
pub trait SchemaCatalog: Send + Sync {
    /// Describes `entity_type`, failing when it is unknown.
    fn describe(&self, entity_type: &str) -> Result<EntityTypeDescriptor>;

    /// The configured "all eligible types" list.
    fn eligible_types(&self) -> Vec<String>;
}

/// In-memory catalog, usually built from the `[types]` config section.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    types: BTreeMap<String, EntityTypeDescriptor>,
    eligible: Vec<String>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor; `eligible` adds it to the "all" list.
    pub fn insert(&mut self, descriptor: EntityTypeDescriptor, eligible: bool) -> Result<()> {
        if descriptor.key_properties.is_empty() {
            return Err(DedupeError::Config(format!(
                "entity type '{}' declares no key properties",
                descriptor.name
            )));
        }
        if eligible && !self.eligible.contains(&descriptor.name) {
            self.eligible.push(descriptor.name.clone());
        }
        self.types.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Builder form of [`Catalog::insert`] for eligible types.
    pub fn with_type(mut self, descriptor: EntityTypeDescriptor) -> Result<Self> {
        self.insert(descriptor, true)?;
        Ok(self)
    }

    /// Iterates over every registered descriptor in name order.
    pub fn descriptors(&self) -> impl Iterator<Item = &EntityTypeDescriptor> {
        self.types.values()
    }
}

impl SchemaCatalog for Catalog {
    fn describe(&self, entity_type: &str) -> Result<EntityTypeDescriptor> {
        self.types
            .get(entity_type)
            .cloned()
            .ok_or_else(|| DedupeError::UnknownEntityType(entity_type.to_string()))
    }

    fn eligible_types(&self) -> Vec<String> {
        self.eligible.clone()
    }
}
