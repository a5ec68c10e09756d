//! Item catalog supplied by content ingestion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result, ValidationError};
use crate::snapshot::ParameterSnapshot;
use crate::types::{DomainId, Item, ItemId, ObjectiveId};

/// Content tags of one item; the engine never authors these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: ItemId,
    pub objectives: Vec<ObjectiveId>,
    pub domain: DomainId,
    pub categories: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemCatalog {
    entries: BTreeMap<ItemId, CatalogEntry>,
}

impl ItemCatalog {
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> std::result::Result<Self, ValidationError> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.categories < 2 {
                return Err(ValidationError::TooFewCategories {
                    item_id: entry.id,
                    categories: entry.categories,
                });
            }
            if entry.objectives.is_empty() {
                return Err(ValidationError::MalformedRecord(format!(
                    "catalog item {} has no learning objectives",
                    entry.id
                )));
            }
            if map.contains_key(&entry.id) {
                return Err(ValidationError::MalformedRecord(format!(
                    "duplicate catalog item {}",
                    entry.id
                )));
            }
            map.insert(entry.id.clone(), entry);
        }
        Ok(Self { entries: map })
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Join a catalog entry with its calibrated parameters.
    pub fn resolve(&self, id: &str, snapshot: &ParameterSnapshot) -> Result<Item> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| EngineError::UnknownItem(id.to_string()))?;
        let params = snapshot
            .params(id)
            .ok_or_else(|| EngineError::UnknownItem(id.to_string()))?;
        if params.categories() != entry.categories {
            return Err(ValidationError::CategoryMismatch {
                item_id: id.to_string(),
                declared: entry.categories,
                actual: params.categories(),
            }
            .into());
        }
        Ok(Item {
            id: entry.id.clone(),
            objectives: entry.objectives.clone(),
            domain: entry.domain.clone(),
            params: params.clone(),
        })
    }

    pub fn resolve_all<'a, I>(&self, ids: I, snapshot: &ParameterSnapshot) -> Result<Vec<Item>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter().map(|id| self.resolve(id, snapshot)).collect()
    }

    /// Every catalog item that has parameters in `snapshot`.
    pub fn calibrated_items(&self, snapshot: &ParameterSnapshot) -> Vec<Item> {
        self.entries
            .keys()
            .filter_map(|id| self.resolve(id, snapshot).ok())
            .collect()
    }
}
