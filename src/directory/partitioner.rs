//! Key-to-partition resolution.
//!
//! The function is part of the contract between the ingestion path and the
//! query path: `crc32(utf8(key)) mod partitions`, CRC-32 being the IEEE
//! polynomial. Both sides must use it with the same partition count or queries
//! silently miss.

use super::catalog::StoreCatalog;
use crate::error::{Result, StateError};
use std::sync::Arc;

pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    debug_assert!(partitions > 0, "store catalog guarantees partitions > 0");
    crc32fast::hash(key.as_bytes()) % partitions
}

/// Resolves `(store, key)` to a partition id using the cluster-wide catalog.
#[derive(Clone)]
pub struct KeyResolver {
    catalog: Arc<StoreCatalog>,
}

impl KeyResolver {
    pub fn new(catalog: Arc<StoreCatalog>) -> Self {
        Self { catalog }
    }

    pub fn resolve(&self, store: &str, key: &str) -> Result<u32> {
        let spec = self
            .catalog
            .get(store)
            .ok_or_else(|| StateError::StoreNotFound(store.to_string()))?;
        Ok(partition_for_key(key, spec.partitions))
    }
}
