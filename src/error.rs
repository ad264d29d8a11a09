//! Error taxonomy of the queryable state core.
//!
//! Every read and write entry point returns these as typed results. Nothing in
//! the core retries; callers decide whether to redirect, retry or give up.

use crate::membership::types::NodeId;
use crate::store::types::{StoreKind, ValueType};

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The store name is unknown anywhere in the cluster.
    #[error("store not found: {0}")]
    StoreNotFound(String),

    /// The store exists cluster-wide but the requested partition is not hosted here.
    #[error("store '{store}' partition {partition:?} is not hosted on this node")]
    StoreNotLocal {
        store: String,
        partition: Option<u32>,
    },

    #[error("key '{key}' not found in store '{store}'")]
    KeyNotFound { store: String, key: String },

    /// The store is known but no node currently owns the key's partition.
    #[error("no node currently owns key '{key}' of store '{store}'")]
    KeyUnresolvable { store: String, key: String },

    #[error("node {node} is unreachable: {reason}")]
    NodeUnreachable { node: NodeId, reason: String },

    #[error("store '{store}' is a {actual} store, operation requires a {expected} store")]
    StoreKindMismatch {
        store: String,
        expected: StoreKind,
        actual: StoreKind,
    },

    #[error("store '{store}' holds {expected} values, got {actual}")]
    ValueTypeMismatch {
        store: String,
        expected: ValueType,
        actual: ValueType,
    },
}

impl StateError {
    /// True for the "nothing there" family that the REST layer reports as 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StateError::StoreNotFound(_)
                | StateError::KeyNotFound { .. }
                | StateError::KeyUnresolvable { .. }
        )
    }
}
