//! Object-relational metadata catalog for ELQ
//!
//! Holds the model type system and the entity set/type registry the
//! expression converter resolves member accesses against. The converter only
//! sees the [`ModelResolver`] trait; [`Model`] is the in-memory
//! implementation used by hosts and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod types;
mod value;

pub use types::{FieldType, PrimitiveKind, TypeUsage};
pub use value::Value;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown entity set: {0}")]
    UnknownEntitySet(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Type {entity} has no property '{property}'")]
    UnknownProperty { entity: String, property: String },
}

/// Store-mapped property of an entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub ty: TypeUsage,
    pub nullable: bool,
}

/// An entity type with its mapped properties in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub properties: Vec<Property>,
}

impl EntityType {
    pub fn find_property(&self, name: &str) -> Result<&Property, ModelError> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ModelError::UnknownProperty {
                entity: self.name.clone(),
                property: name.to_string(),
            })
    }
}

/// A named, queryable extent of a single entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
}

/// Trait for resolving model metadata at conversion time.
pub trait ModelResolver {
    /// Get an entity set by name.
    fn entity_set(&self, name: &str) -> Result<&EntitySet, ModelError>;

    /// Get an entity type by name.
    fn entity_type(&self, name: &str) -> Result<&EntityType, ModelError>;
}

/// In-memory model catalog.
pub struct Model {
    entity_sets: HashMap<String, EntitySet>,
    entity_types: HashMap<String, EntityType>,
}

impl Model {
    pub fn new() -> Self {
        Self {
            entity_sets: HashMap::new(),
            entity_types: HashMap::new(),
        }
    }

    pub fn add_entity_type(&mut self, entity_type: EntityType) {
        self.entity_types.insert(entity_type.name.clone(), entity_type);
    }

    pub fn add_entity_set(&mut self, set: EntitySet) {
        self.entity_sets.insert(set.name.clone(), set);
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelResolver for Model {
    fn entity_set(&self, name: &str) -> Result<&EntitySet, ModelError> {
        self.entity_sets
            .get(name)
            .ok_or_else(|| ModelError::UnknownEntitySet(name.to_string()))
    }

    fn entity_type(&self, name: &str) -> Result<&EntityType, ModelError> {
        self.entity_types
            .get(name)
            .ok_or_else(|| ModelError::UnknownEntityType(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> Model {
        let mut model = Model::new();
        model.add_entity_type(EntityType {
            name: "Run".to_string(),
            properties: vec![
                Property {
                    name: "Id".to_string(),
                    ty: TypeUsage::Primitive(PrimitiveKind::Int32),
                    nullable: false,
                },
                Property {
                    name: "Name".to_string(),
                    ty: TypeUsage::Primitive(PrimitiveKind::String),
                    nullable: true,
                },
            ],
        });
        model.add_entity_set(EntitySet {
            name: "Runs".to_string(),
            entity_type: "Run".to_string(),
        });
        model
    }

    #[test]
    fn test_entity_set_lookup() {
        let model = sample_model();
        let set = model.entity_set("Runs").unwrap();
        assert_eq!(set.entity_type, "Run");

        let err = model.entity_set("Tasks").unwrap_err();
        assert!(matches!(err, ModelError::UnknownEntitySet(_)));
    }

    #[test]
    fn test_property_lookup() {
        let model = sample_model();
        let run = model.entity_type("Run").unwrap();
        let name = run.find_property("Name").unwrap();
        assert!(name.nullable);

        let err = run.find_property("Missing").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type Run has no property 'Missing'"
        );
    }
}
