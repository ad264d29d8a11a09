use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::StateStore;
use super::iter::{EntryIter, WindowIter};
use super::types::{StoreKind, StoreSpec, UpdateOutcome, Value};
use crate::error::{Result, StateError};

/// Partitions created and dropped by one [`StoreEngine::sync_assignment`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub assigned: Vec<(String, u32)>,
    pub revoked: Vec<(String, u32)>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty() && self.revoked.is_empty()
    }
}

/// Partitions this node should host under one assignment version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub version: u64,
    pub stores: Vec<(StoreSpec, BTreeSet<u32>)>,
}

impl Placement {
    pub fn new(version: u64, stores: Vec<(StoreSpec, BTreeSet<u32>)>) -> Self {
        Self { version, stores }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub name: String,
    pub kind: StoreKind,
    pub partitions: Vec<u32>,
    pub entries: usize,
}

/// All stores hosted by this node, by name.
///
/// A store exists here only while at least one of its partitions is assigned
/// to this node; asking for any other store yields `StoreNotFound`.
#[derive(Default)]
pub struct StoreEngine {
    stores: DashMap<String, StateStore>,
    open_iterators: Arc<AtomicUsize>,
    /// Version of the last placement applied. Held for the whole sync.
    applied: Mutex<Option<u64>>,
}

impl StoreEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, name: &str) -> Result<StateStore> {
        self.stores
            .get(name)
            .map(|store| store.value().clone())
            .ok_or_else(|| StateError::StoreNotFound(name.to_string()))
    }

    pub fn get(&self, store: &str, key: &str) -> Result<Value> {
        self.store(store)?.readable().get(key)
    }

    pub fn range(&self, store: &str, from: &str, to: &str) -> Result<EntryIter> {
        Ok(self.store(store)?.readable().range(from, to))
    }

    pub fn all(&self, store: &str) -> Result<EntryIter> {
        Ok(self.store(store)?.readable().all())
    }

    pub fn fetch_window(&self, store: &str, key: &str, from: i64, to: i64) -> Result<WindowIter> {
        self.store(store)?.as_windowed()?.fetch(key, from, to)
    }

    /// Write entry point of the ingestion path.
    ///
    /// `window_start` must be given for windowed stores and omitted for plain ones.
    pub fn apply_update(
        &self,
        store: &str,
        key: &str,
        value: Value,
        window_start: Option<i64>,
    ) -> Result<UpdateOutcome> {
        let target = self.store(store)?;
        match (&target, window_start) {
            (StateStore::KeyValue(kv), None) => {
                kv.put(key, value)?;
                Ok(UpdateOutcome::Applied)
            }
            (StateStore::Windowed(windowed), Some(start)) => windowed.put(key, start, value),
            (StateStore::KeyValue(_), Some(_)) => Err(StateError::StoreKindMismatch {
                store: store.to_string(),
                expected: StoreKind::Windowed,
                actual: StoreKind::KeyValue,
            }),
            (StateStore::Windowed(_), None) => Err(StateError::StoreKindMismatch {
                store: store.to_string(),
                expected: StoreKind::KeyValue,
                actual: StoreKind::Windowed,
            }),
        }
    }

    /// Tombstone for a plain store. Returns whether the key was present.
    pub fn apply_delete(&self, store: &str, key: &str) -> Result<bool> {
        self.store(store)?.as_key_value()?.delete(key)
    }

    /// Creates the store on first use. Returns false if the partition was already hosted.
    pub fn assign_partition(&self, spec: &StoreSpec, partition: u32) -> bool {
        // The entry guard keeps a concurrent revoke from dropping the store in between.
        let store = self
            .stores
            .entry(spec.name.clone())
            .or_insert_with(|| StateStore::new(spec.clone(), self.open_iterators.clone()));
        store.value().add_partition(partition)
    }

    /// Drops a partition, and the whole store once its last partition is gone.
    pub fn revoke_partition(&self, store: &str, partition: u32) -> bool {
        let mut removed = false;
        let destroyed = self
            .stores
            .remove_if(store, |_, s| {
                removed = s.remove_partition(partition);
                s.partitions().is_empty()
            })
            .is_some();
        if destroyed {
            tracing::info!("Store {} has no local partitions left, destroyed", store);
        }
        removed
    }

    /// Brings the hosted partitions in line with `placement`.
    ///
    /// Syncs are serialized. A placement older than the last one applied is
    /// ignored, so a slow caller cannot roll the engine back.
    pub fn sync_assignment(&self, placement: &Placement) -> SyncReport {
        let mut applied = self.applied.lock();
        if let Some(current) = *applied
            && placement.version < current
        {
            tracing::debug!(
                "Ignoring stale placement v{} (v{} already applied)",
                placement.version,
                current
            );
            return SyncReport::default();
        }

        let wanted: BTreeMap<&str, (&StoreSpec, &BTreeSet<u32>)> = placement
            .stores
            .iter()
            .map(|(spec, partitions)| (spec.name.as_str(), (spec, partitions)))
            .collect();

        let mut report = SyncReport::default();

        for (store, hosted) in self.hosted_partitions() {
            let keep = wanted.get(store.as_str()).map(|(_, p)| *p);
            for partition in hosted {
                if keep.is_none_or(|p| !p.contains(&partition)) {
                    self.revoke_partition(&store, partition);
                    report.revoked.push((store.clone(), partition));
                }
            }
        }

        for (spec, partitions) in wanted.values() {
            for partition in partitions.iter() {
                if self.assign_partition(spec, *partition) {
                    report.assigned.push((spec.name.clone(), *partition));
                }
            }
        }

        *applied = Some(placement.version);
        report
    }

    /// Version of the last placement applied, if any.
    pub fn placement_version(&self) -> Option<u64> {
        *self.applied.lock()
    }

    pub fn hosted_partitions(&self) -> BTreeMap<String, Vec<u32>> {
        self.stores
            .iter()
            .map(|e| (e.key().clone(), e.value().partitions()))
            .collect()
    }

    /// Retention sweep over every windowed store. Returns windows evicted.
    pub fn evict_expired(&self) -> usize {
        let windowed: Vec<StateStore> = self
            .stores
            .iter()
            .filter(|e| e.value().kind() == StoreKind::Windowed)
            .map(|e| e.value().clone())
            .collect();
        windowed
            .iter()
            .filter_map(|store| store.as_windowed().ok())
            .map(|store| store.evict_expired())
            .sum()
    }

    pub fn stats(&self) -> Vec<StoreStats> {
        let mut stats: Vec<StoreStats> = self
            .stores
            .iter()
            .map(|e| StoreStats {
                name: e.key().clone(),
                kind: e.value().kind(),
                partitions: e.value().partitions(),
                entries: e.value().len(),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Scans opened and not yet exhausted or dropped.
    pub fn open_iterators(&self) -> usize {
        self.open_iterators.load(Ordering::Acquire)
    }
}
