use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::Mutex;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use super::ReadOnlyStore;
use super::iter::{Cursor, EntryIter, RetentionClock, ScanGuard, WindowIter, WindowKey};
use super::types::{StoreSpec, UpdateOutcome, Value, WindowSpec};
use crate::directory::partitioner::partition_for_key;
use crate::error::{Result, StateError};

struct WindowPartition {
    entries: Arc<SkipMap<WindowKey, Value>>,
    /// `(window start, key)` index used to evict in stream-time order.
    by_time: SkipMap<(i64, String), ()>,
    writer: Mutex<()>,
}

impl WindowPartition {
    fn new() -> Self {
        Self {
            entries: Arc::new(SkipMap::new()),
            by_time: SkipMap::new(),
            writer: Mutex::new(()),
        }
    }

    /// Caller must hold `writer`.
    fn evict_through(&self, cutoff: i64) -> usize {
        let mut evicted = 0;
        while let Some(oldest) = self.by_time.front() {
            let (start, key) = oldest.key();
            if *start > cutoff {
                break;
            }
            self.entries.remove(&(key.clone(), *start));
            oldest.remove();
            evicted += 1;
        }
        evicted
    }
}

/// Windowed store: values keyed by `(key, window start)` with retention.
pub struct WindowStore {
    spec: StoreSpec,
    window: WindowSpec,
    partitions: DashMap<u32, Arc<WindowPartition>>,
    clock: RetentionClock,
    open_iterators: Arc<AtomicUsize>,
}

impl WindowStore {
    pub(crate) fn new(
        spec: StoreSpec,
        window: WindowSpec,
        open_iterators: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            clock: RetentionClock::new(window.retention_ms),
            spec,
            window,
            partitions: DashMap::new(),
            open_iterators,
        }
    }

    pub fn window(&self) -> WindowSpec {
        self.window
    }

    /// Highest window start applied so far, if any.
    pub fn stream_time(&self) -> Option<i64> {
        self.clock.stream_time()
    }

    pub(crate) fn add_partition(&self, partition: u32) -> bool {
        match self.partitions.entry(partition) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(slot) => {
                slot.insert(Arc::new(WindowPartition::new()));
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

    fn partition_of(&self, key: &str) -> Result<Arc<WindowPartition>> {
        let partition = partition_for_key(key, self.spec.partitions);
        self.partitions
            .get(&partition)
            .map(|p| p.value().clone())
            .ok_or_else(|| StateError::StoreNotLocal {
                store: self.spec.name.clone(),
                partition: Some(partition),
            })
    }

    fn sources(&self) -> Vec<Arc<SkipMap<WindowKey, Value>>> {
        let mut hosted: Vec<(u32, Arc<SkipMap<WindowKey, Value>>)> = self
            .partitions
            .iter()
            .map(|e| (*e.key(), e.value().entries.clone()))
            .collect();
        hosted.sort_unstable_by_key(|(id, _)| *id);
        hosted.into_iter().map(|(_, entries)| entries).collect()
    }

    /// Stores `value` under `(key, window_start)`. The start is used as given,
    /// see [`WindowSpec`].
    pub fn put(&self, key: &str, window_start: i64, value: Value) -> Result<UpdateOutcome> {
        if value.value_type() != self.spec.value_type {
            return Err(StateError::ValueTypeMismatch {
                store: self.spec.name.clone(),
                expected: self.spec.value_type,
                actual: value.value_type(),
            });
        }
        let partition = self.partition_of(key)?;
        let _writer = partition.writer.lock();

        self.clock.observe(window_start);
        if self.clock.is_expired(window_start) {
            tracing::debug!(
                "Dropping expired window {}@{} for store {}",
                key,
                window_start,
                self.spec.name
            );
            return Ok(UpdateOutcome::Expired);
        }

        partition
            .entries
            .insert((key.to_string(), window_start), value);
        partition.by_time.insert((window_start, key.to_string()), ());

        if let Some(cutoff) = self.clock.cutoff() {
            partition.evict_through(cutoff);
        }
        Ok(UpdateOutcome::Applied)
    }

    /// Drops every window that has fallen out of retention. Returns the count.
    pub fn evict_expired(&self) -> usize {
        let Some(cutoff) = self.clock.cutoff() else {
            return 0;
        };
        let hosted: Vec<Arc<WindowPartition>> =
            self.partitions.iter().map(|e| e.value().clone()).collect();
        hosted
            .iter()
            .map(|partition| {
                let _writer = partition.writer.lock();
                partition.evict_through(cutoff)
            })
            .sum()
    }

    /// Values of `key` whose window start lies in `[from, to]`, ascending.
    pub fn fetch(&self, key: &str, from: i64, to: i64) -> Result<WindowIter> {
        let partition = self.partition_of(key)?;
        let cursor = Cursor::new(
            vec![partition.entries.clone()],
            Bound::Included((key.to_string(), from)),
            Bound::Included((key.to_string(), to)),
            ScanGuard::register(&self.open_iterators),
        );
        Ok(WindowIter::new(cursor, self.clock.clone()))
    }

    fn scan(&self, lower: Bound<WindowKey>, upper: Bound<WindowKey>) -> EntryIter {
        let cursor = Cursor::new(
            self.sources(),
            lower,
            upper,
            ScanGuard::register(&self.open_iterators),
        );
        EntryIter::windowed(cursor, self.clock.clone())
    }
}

impl ReadOnlyStore for WindowStore {
    fn spec(&self) -> &StoreSpec {
        &self.spec
    }

    /// Value of the latest unexpired window of `key`.
    fn get(&self, key: &str) -> Result<Value> {
        let partition = self.partition_of(key)?;
        let latest = partition
            .entries
            .upper_bound(Bound::Included(&(key.to_string(), i64::MAX)));
        match latest {
            Some(entry) if entry.key().0 == key && !self.clock.is_expired(entry.key().1) => {
                Ok(entry.value().clone())
            }
            _ => Err(StateError::KeyNotFound {
                store: self.spec.name.clone(),
                key: key.to_string(),
            }),
        }
    }

    fn range(&self, from: &str, to: &str) -> EntryIter {
        self.scan(
            Bound::Included((from.to_string(), i64::MIN)),
            Bound::Included((to.to_string(), i64::MAX)),
        )
    }

    fn all(&self) -> EntryIter {
        self.scan(Bound::Unbounded, Bound::Unbounded)
    }
}
