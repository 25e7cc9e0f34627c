//! Logical ↔ physical field mapping and the catalog lookup trait

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{DataType, Field};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Entity '{0}' not found")]
    EntityNotFound(String),
}

/// Physical field name for a catalog column.
///
/// Names starting with `_` (such as `_id`) are store-owned and kept verbatim;
/// every other column is stored under its numeric id so logical renames never
/// touch stored documents.
pub fn physical_field_name(logical: &str, field_id: u64) -> String {
    if logical.starts_with('_') {
        return logical.to_string();
    }
    format!("col{}", field_id)
}

/// Physical collection name for a catalog entity
pub fn physical_entity_name(entity_id: u64) -> String {
    format!("tab-{}", entity_id)
}

/// One column of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub logical: String,
    pub physical: String,
    pub field_id: u64,
    #[serde(default = "unknown_type")]
    pub data_type: DataType,
}

fn unknown_type() -> DataType {
    DataType::Unknown
}

/// Ordered column mapping of one entity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMapping {
    pub fields: Vec<FieldMapping>,
}

impl RowMapping {
    pub fn new(fields: Vec<FieldMapping>) -> Self {
        Self { fields }
    }

    /// Build a mapping from `(logical name, field id, type)` triples, deriving
    /// physical names from the ids.
    pub fn from_columns<S: Into<String>>(columns: impl IntoIterator<Item = (S, u64, DataType)>) -> Self {
        let fields = columns
            .into_iter()
            .map(|(name, field_id, data_type)| {
                let logical = name.into();
                FieldMapping {
                    physical: physical_field_name(&logical, field_id),
                    logical,
                    field_id,
                    data_type,
                }
            })
            .collect();
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn physical_name(&self, logical: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.logical == logical)
            .map(|f| f.physical.as_str())
    }

    pub fn by_id(&self, field_id: u64) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }

    pub fn logical_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.logical.clone()).collect()
    }

    pub fn physical_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.physical.clone()).collect()
    }

    /// Row type a scan over this mapping produces
    pub fn row_type(&self) -> Vec<Field> {
        self.fields
            .iter()
            .map(|f| Field::new(f.logical.clone(), f.data_type.clone()))
            .collect()
    }
}

/// Trait for resolving entity mappings at translation time
pub trait CatalogProvider {
    /// Get the row mapping for an entity by name
    fn row_mapping(&self, entity: &str) -> Result<RowMapping, CatalogError>;

    /// Name of the collection backing an entity
    fn collection_name(&self, entity: &str) -> Result<String, CatalogError> {
        Ok(entity.to_string())
    }
}

/// In-memory catalog for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entities: HashMap<String, RowMapping>,
    collections: HashMap<String, String>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    /// Register an entity stored in a collection of the same name
    pub fn add_entity(&mut self, name: impl Into<String>, mapping: RowMapping) {
        self.entities.insert(name.into(), mapping);
    }

    /// Register an entity stored under its id-derived collection name
    pub fn add_entity_with_id(&mut self, name: impl Into<String>, entity_id: u64, mapping: RowMapping) {
        let name = name.into();
        self.collections
            .insert(name.clone(), physical_entity_name(entity_id));
        self.entities.insert(name, mapping);
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(|k| k.as_str()).collect();
        names.sort();
        names
    }
}

impl CatalogProvider for MemoryCatalog {
    fn row_mapping(&self, entity: &str) -> Result<RowMapping, CatalogError> {
        self.entities
            .get(entity)
            .cloned()
            .ok_or_else(|| CatalogError::EntityNotFound(entity.to_string()))
    }

    fn collection_name(&self, entity: &str) -> Result<String, CatalogError> {
        if !self.entities.contains_key(entity) {
            return Err(CatalogError::EntityNotFound(entity.to_string()));
        }
        Ok(self
            .collections
            .get(entity)
            .cloned()
            .unwrap_or_else(|| entity.to_string()))
    }
}
