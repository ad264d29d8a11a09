//! Local Store Engine
//!
//! Holds the partitions of every store assigned to this node and answers
//! read-only queries against them without any network I/O.
//!
//! ## Core Concepts
//! - **Variants**: a store is either a plain keyed store or a windowed store.
//!   Both expose the shared [`ReadOnlyStore`] capability (`get`/`range`/`all`);
//!   only the windowed variant adds `fetch`.
//! - **Partitions**: each hosted partition is its own skip list, so readers
//!   never block each other and writers only serialize per partition.
//! - **Scans**: lazy live-view cursors (see [`iter`]) that release their
//!   resources on exhaustion or when dropped early.
//! - **Writes**: arrive through [`StoreEngine::apply_update`], the entry point of
//!   the upstream ingestion path. It is not exposed over the network.

pub mod engine;
pub mod iter;
pub mod keyvalue;
pub mod types;
pub mod window;


use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use crate::error::{Result, StateError};
use iter::EntryIter;
use keyvalue::KeyValueStore;
use types::{StoreKind, StoreSpec, Value};
use window::WindowStore;

/// Read capability shared by both store variants.
pub trait ReadOnlyStore: Send + Sync {
    fn spec(&self) -> &StoreSpec;

    fn get(&self, key: &str) -> Result<Value>;

    /// Entries with `from <= key <= to`, ascending. Empty when `from > to`.
    fn range(&self, from: &str, to: &str) -> EntryIter;

    fn all(&self) -> EntryIter;
}

#[derive(Clone)]
pub enum StateStore {
    KeyValue(Arc<KeyValueStore>),
    Windowed(Arc<WindowStore>),
}

impl StateStore {
    pub(crate) fn new(spec: StoreSpec, open_iterators: Arc<AtomicUsize>) -> Self {
        match spec.window {
            Some(window) => {
                StateStore::Windowed(Arc::new(WindowStore::new(spec, window, open_iterators)))
            }
            None => StateStore::KeyValue(Arc::new(KeyValueStore::new(spec, open_iterators))),
        }
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            StateStore::KeyValue(_) => StoreKind::KeyValue,
            StateStore::Windowed(_) => StoreKind::Windowed,
        }
    }

    pub fn readable(&self) -> &dyn ReadOnlyStore {
        match self {
            StateStore::KeyValue(store) => store.as_ref(),
            StateStore::Windowed(store) => store.as_ref(),
        }
    }

    pub fn spec(&self) -> &StoreSpec {
        self.readable().spec()
    }

    pub fn as_key_value(&self) -> Result<&Arc<KeyValueStore>> {
        match self {
            StateStore::KeyValue(store) => Ok(store),
            StateStore::Windowed(_) => Err(self.kind_mismatch(StoreKind::KeyValue)),
        }
    }

    pub fn as_windowed(&self) -> Result<&Arc<WindowStore>> {
        match self {
            StateStore::Windowed(store) => Ok(store),
            StateStore::KeyValue(_) => Err(self.kind_mismatch(StoreKind::Windowed)),
        }
    }

    fn kind_mismatch(&self, expected: StoreKind) -> StateError {
        StateError::StoreKindMismatch {
            store: self.spec().name.clone(),
            expected,
            actual: self.kind(),
        }
    }

    pub fn partitions(&self) -> Vec<u32> {
        match self {
            StateStore::KeyValue(store) => store.partitions(),
            StateStore::Windowed(store) => store.partitions(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StateStore::KeyValue(store) => store.len(),
            StateStore::Windowed(store) => store.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn add_partition(&self, partition: u32) -> bool {
        match self {
            StateStore::KeyValue(store) => store.add_partition(partition),
            StateStore::Windowed(store) => store.add_partition(partition),
        }
    }

    pub(crate) fn remove_partition(&self, partition: u32) -> bool {
        match self {
            StateStore::KeyValue(store) => store.remove_partition(partition),
            StateStore::Windowed(store) => store.remove_partition(partition),
        }
    }
}
