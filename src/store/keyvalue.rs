use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use super::ReadOnlyStore;
use super::iter::{Cursor, EntryIter, ScanGuard};
use super::types::{StoreSpec, Value};
use crate::directory::partitioner::partition_for_key;
use crate::error::{Result, StateError};

struct KeyValuePartition {
    entries: Arc<SkipMap<String, Value>>,
    /// Serializes writers of this partition. Readers never take it.
    writer: Mutex<()>,
}

impl KeyValuePartition {
    fn new() -> Self {
        Self {
            entries: Arc::new(SkipMap::new()),
            writer: Mutex::new(()),
        }
    }
}

/// Plain keyed store: the locally hosted partitions of one logical store.
pub struct KeyValueStore {
    spec: StoreSpec,
    partitions: DashMap<u32, Arc<KeyValuePartition>>,
    open_iterators: Arc<AtomicUsize>,
}

impl KeyValueStore {
    pub(crate) fn new(spec: StoreSpec, open_iterators: Arc<AtomicUsize>) -> Self {
        Self {
            spec,
            partitions: DashMap::new(),
            open_iterators,
        }
    }

    pub(crate) fn add_partition(&self, partition: u32) -> bool {
        match self.partitions.entry(partition) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(KeyValuePartition::new()));
                true
            }
        }
    }

    pub(crate) fn remove_partition(&self, partition: u32) -> bool {
        self.partitions.remove(&partition).is_some()
    }

    pub fn partitions(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.partitions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.partitions
            .iter()
            .map(|e| e.value().entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn partition_of(&self, key: &str) -> Result<Arc<KeyValuePartition>> {
        let partition = partition_for_key(key, self.spec.partitions);
        self.partitions
            .get(&partition)
            .map(|p| p.value().clone())
            .ok_or_else(|| StateError::StoreNotLocal {
                store: self.spec.name.clone(),
                partition: Some(partition),
            })
    }

    pub fn put(&self, key: &str, value: Value) -> Result<()> {
        if value.value_type() != self.spec.value_type {
            return Err(StateError::ValueTypeMismatch {
                store: self.spec.name.clone(),
                expected: self.spec.value_type,
                actual: value.value_type(),
            });
        }
        let partition = self.partition_of(key)?;
        let _writer = partition.writer.lock();
        partition.entries.insert(key.to_string(), value);
        Ok(())
    }

    /// Removes `key`; returns whether it was present.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let partition = self.partition_of(key)?;
        let _writer = partition.writer.lock();
        Ok(partition.entries.remove(key).is_some())
    }

    fn scan(&self, lower: Bound<String>, upper: Bound<String>) -> EntryIter {
        let mut hosted: Vec<(u32, Arc<SkipMap<String, Value>>)> = self
            .partitions
            .iter()
            .map(|e| (*e.key(), e.value().entries.clone()))
            .collect();
        hosted.sort_unstable_by_key(|(id, _)| *id);
        let sources = hosted.into_iter().map(|(_, entries)| entries).collect();

        EntryIter::plain(Cursor::new(
            sources,
            lower,
            upper,
            ScanGuard::register(&self.open_iterators),
        ))
    }
}

impl ReadOnlyStore for KeyValueStore {
    fn spec(&self) -> &StoreSpec {
        &self.spec
    }

    fn get(&self, key: &str) -> Result<Value> {
        let partition = self.partition_of(key)?;
        partition
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StateError::KeyNotFound {
                store: self.spec.name.clone(),
                key: key.to_string(),
            })
    }

    fn range(&self, from: &str, to: &str) -> EntryIter {
        self.scan(
            Bound::Included(from.to_string()),
            Bound::Included(to.to_string()),
        )
    }

    fn all(&self) -> EntryIter {
        self.scan(Bound::Unbounded, Bound::Unbounded)
    }
}
