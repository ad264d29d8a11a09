use crate::store::types::StoreSpec;
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("store '{0}' is defined more than once")]
    DuplicateStore(String),
    #[error("store name must not be empty")]
    EmptyName,
    #[error("store '{0}' must have at least one partition")]
    NoPartitions(String),
    #[error("windowed store '{0}' must have a positive window size")]
    InvalidWindowSize(String),
    #[error("windowed store '{0}' must retain at least one full window")]
    RetentionTooShort(String),
}

/// Validated set of store definitions shared by the whole cluster.
#[derive(Debug, Clone, Default)]
pub struct StoreCatalog {
    stores: BTreeMap<String, StoreSpec>,
}

impl StoreCatalog {
    pub fn new(specs: Vec<StoreSpec>) -> Result<Self, CatalogError> {
        let mut stores = BTreeMap::new();
        for spec in specs {
            if spec.name.is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if spec.partitions == 0 {
                return Err(CatalogError::NoPartitions(spec.name));
            }
            if let Some(window) = spec.window {
                if window.size_ms <= 0 {
                    return Err(CatalogError::InvalidWindowSize(spec.name));
                }
                if window.retention_ms < window.size_ms {
                    return Err(CatalogError::RetentionTooShort(spec.name));
                }
            }
            if stores.contains_key(&spec.name) {
                return Err(CatalogError::DuplicateStore(spec.name));
            }
            stores.insert(spec.name.clone(), spec);
        }
        Ok(Self { stores })
    }

    pub fn get(&self, name: &str) -> Option<&StoreSpec> {
        self.stores.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn specs(&self) -> impl Iterator<Item = &StoreSpec> {
        self.stores.values()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
