//! Startup loading of the engine configuration and the authored item bank.

use std::path::Path;

use adaptive_core::{CatalogEntry, EngineConfig, ItemCatalog, ItemParameters, ParameterSnapshot, ValidationError};
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One authored item: catalog tags plus its starting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapItem {
    pub id: String,
    pub objectives: Vec<String>,
    pub domain: String,
    pub params: ItemParameters,
}

/// Item bank file read at startup (`ENGINE_BOOTSTRAP`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bootstrap {
    #[serde(default)]
    pub items: Vec<BootstrapItem>,
}

impl Bootstrap {
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::MalformedRecord(e.to_string()))
    }

    /// Split into the catalog and the version 1 snapshot. An empty bank
    /// yields the version 0 snapshot.
    pub fn into_parts(self) -> Result<(ItemCatalog, ParameterSnapshot), ValidationError> {
        let mut params = Vec::with_capacity(self.items.len());
        let mut entries = Vec::with_capacity(self.items.len());
        for item in self.items {
            item.params.validate(&item.id)?;
            entries.push(CatalogEntry {
                id: item.id.clone(),
                objectives: item.objectives,
                domain: item.domain,
                categories: item.params.categories(),
            });
            params.push((item.id, item.params));
        }

        let catalog = ItemCatalog::new(entries)?;
        let snapshot = if params.is_empty() {
            ParameterSnapshot::empty()
        } else {
            ParameterSnapshot::initial(params)?
        };
        Ok((catalog, snapshot))
    }
}

/// Read `EngineConfig` from a JSON file, or use the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading engine config {}", path.display()))?;
            Ok(EngineConfig::from_json_str(&json)?)
        }
        None => {
            tracing::info!("ENGINE_CONFIG not set, using default configuration");
            Ok(EngineConfig::default())
        }
    }
}

/// Read the item bank from a JSON file, or start empty.
pub fn load_bootstrap(path: Option<&Path>) -> anyhow::Result<Bootstrap> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading item bank {}", path.display()))?;
            Ok(Bootstrap::from_json_str(&json)?)
        }
        None => {
            tracing::warn!("ENGINE_BOOTSTRAP not set, starting with an empty item bank");
            Ok(Bootstrap::default())
        }
    }
}
