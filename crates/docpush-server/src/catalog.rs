//! Entity catalog loaded from YAML
//!
//! ```yaml
//! entities:
//!   - name: emps
//!     id: 3
//!     columns:
//!       - { name: _id, id: 0, type: String }
//!       - { name: deptno, id: 8, type: Int32 }
//! ```

use docpush_ir::{DataType, MemoryCatalog, RowMapping};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::config::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnEntry {
    pub name: String,
    pub id: u64,
    #[serde(rename = "type", default = "unknown_type")]
    pub data_type: DataType,
}

fn unknown_type() -> DataType {
    DataType::Unknown
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    pub name: String,
    /// Entities with an id live in `tab-{id}`, others under their own name
    #[serde(default)]
    pub id: Option<u64>,
    pub columns: Vec<ColumnEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub entities: Vec<EntityEntry>,
}

impl CatalogFile {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn into_catalog(self) -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        for entity in self.entities {
            let mapping = RowMapping::from_columns(
                entity
                    .columns
                    .into_iter()
                    .map(|c| (c.name, c.id, c.data_type)),
            );
            match entity.id {
                Some(id) => catalog.add_entity_with_id(entity.name, id, mapping),
                None => catalog.add_entity(entity.name, mapping),
            }
        }
        catalog
    }
}

/// Load the configured catalog, or an empty one when no path is set
pub fn load_catalog(path: Option<&str>) -> Result<MemoryCatalog, ConfigError> {
    let Some(path) = path else {
        info!("No catalog configured, starting with an empty catalog");
        return Ok(MemoryCatalog::new());
    };
    let catalog = CatalogFile::load(path)?.into_catalog();
    info!(path = %path, entities = ?catalog.entity_names(), "Catalog loaded");
    Ok(catalog)
}
