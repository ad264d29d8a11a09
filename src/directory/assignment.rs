//! Partition Assignment Table
//!
//! Maps `(store, partition)` to exactly one owning node. The table is a
//! sequence of immutable, versioned snapshots: a rebalance builds a complete new
//! snapshot off to the side and swaps it in with a single pointer store, so a
//! reader holding a snapshot can never observe a partition with zero or two
//! owners.
//!
//! Nodes live in an arena (`Vec<NodeInfo>`); ownership refers to them by index.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::membership::types::NodeId;
use crate::store::types::StoreSpec;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("store '{0}' is not part of the assignment")]
    UnknownStore(String),
    #[error("partition {partition} is out of range for store '{store}' ({partitions} partitions)")]
    PartitionOutOfRange {
        store: String,
        partition: u32,
        partitions: u32,
    },
    #[error("node {0} is not part of the assignment")]
    UnknownNode(NodeId),
    #[error("node {0} was added twice")]
    DuplicateNode(NodeId),
    #[error("partition {partition} of store '{store}' has no owner")]
    UnassignedPartition { store: String, partition: u32 },
    #[error("cannot assign partitions without any member")]
    NoMembers,
    #[error("store '{0}' does not match its catalog definition")]
    CatalogMismatch(String),
}

/// Address of a cluster member's query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEndpoint {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

/// A cluster member together with the partitions it owns in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub partitions: BTreeMap<String, BTreeSet<u32>>,
}

impl NodeInfo {
    fn from_endpoint(endpoint: MemberEndpoint) -> Self {
        Self {
            id: endpoint.id,
            host: endpoint.host,
            port: endpoint.port,
            partitions: BTreeMap::new(),
        }
    }

    pub fn store_names(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    pub fn hosts(&self, store: &str, partition: u32) -> bool {
        self.partitions
            .get(store)
            .is_some_and(|p| p.contains(&partition))
    }

    /// `host:port` of the node's query endpoint.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
struct StoreAssignment {
    spec: StoreSpec,
    /// `owners[partition]` indexes into the node arena.
    owners: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentSnapshot {
    version: u64,
    nodes: Vec<NodeInfo>,
    stores: BTreeMap<String, StoreAssignment>,
}

impl AssignmentSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nodes(&self) -> &[NodeInfo] {
        &self.nodes
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn contains_store(&self, store: &str) -> bool {
        self.stores.contains_key(store)
    }

    pub fn store_spec(&self, store: &str) -> Option<&StoreSpec> {
        self.stores.get(store).map(|a| &a.spec)
    }

    fn assignment(&self, store: &str) -> Result<&StoreAssignment, AssignmentError> {
        self.stores
            .get(store)
            .ok_or_else(|| AssignmentError::UnknownStore(store.to_string()))
    }

    pub fn owner_of(&self, store: &str, partition: u32) -> Result<&NodeInfo, AssignmentError> {
        let assignment = self.assignment(store)?;
        let owner = assignment.owners.get(partition as usize).ok_or_else(|| {
            AssignmentError::PartitionOutOfRange {
                store: store.to_string(),
                partition,
                partitions: assignment.spec.partitions,
            }
        })?;
        Ok(&self.nodes[*owner])
    }

    pub fn partitions_of(&self, store: &str) -> Result<Vec<u32>, AssignmentError> {
        let assignment = self.assignment(store)?;
        Ok((0..assignment.spec.partitions).collect())
    }

    /// Nodes owning at least one partition of `store`, in arena order.
    pub fn nodes_for_store(&self, store: &str) -> Vec<&NodeInfo> {
        self.nodes
            .iter()
            .filter(|n| n.partitions.contains_key(store))
            .collect()
    }

    /// Everything `node` owns, by store.
    pub fn assignment_for(&self, node: &NodeId) -> Vec<(StoreSpec, BTreeSet<u32>)> {
        let Some(info) = self.node(node) else {
            return Vec::new();
        };
        info.partitions
            .iter()
            .filter_map(|(store, partitions)| {
                self.stores
                    .get(store)
                    .map(|a| (a.spec.clone(), partitions.clone()))
            })
            .collect()
    }
}

/// Collects nodes and ownership, then validates them into a snapshot.
#[derive(Debug, Default)]
pub struct AssignmentBuilder {
    nodes: Vec<NodeInfo>,
    index: HashMap<NodeId, usize>,
    stores: BTreeMap<String, (StoreSpec, Vec<Option<usize>>)>,
}

impl AssignmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, endpoint: MemberEndpoint) -> Result<usize, AssignmentError> {
        if self.index.contains_key(&endpoint.id) {
            return Err(AssignmentError::DuplicateNode(endpoint.id));
        }
        let slot = self.nodes.len();
        self.index.insert(endpoint.id.clone(), slot);
        self.nodes.push(NodeInfo::from_endpoint(endpoint));
        Ok(slot)
    }

    pub fn add_store(&mut self, spec: StoreSpec) {
        let owners = vec![None; spec.partitions as usize];
        self.stores.insert(spec.name.clone(), (spec, owners));
    }

    pub fn store_specs(&self) -> impl Iterator<Item = &StoreSpec> {
        self.stores.values().map(|(spec, _)| spec)
    }

    /// Sets the single owner of a partition, replacing any previous one.
    pub fn assign(
        &mut self,
        store: &str,
        partition: u32,
        node: &NodeId,
    ) -> Result<(), AssignmentError> {
        let slot = *self
            .index
            .get(node)
            .ok_or_else(|| AssignmentError::UnknownNode(node.clone()))?;
        let (spec, owners) = self
            .stores
            .get_mut(store)
            .ok_or_else(|| AssignmentError::UnknownStore(store.to_string()))?;
        let owner = owners.get_mut(partition as usize).ok_or_else(|| {
            AssignmentError::PartitionOutOfRange {
                store: store.to_string(),
                partition,
                partitions: spec.partitions,
            }
        })?;
        *owner = Some(slot);
        Ok(())
    }

    pub fn build(self) -> Result<AssignmentSnapshot, AssignmentError> {
        let mut nodes = self.nodes;
        let mut stores = BTreeMap::new();

        for (name, (spec, owners)) in self.stores {
            let mut resolved = Vec::with_capacity(owners.len());
            for (partition, owner) in owners.into_iter().enumerate() {
                let slot = owner.ok_or_else(|| AssignmentError::UnassignedPartition {
                    store: name.clone(),
                    partition: partition as u32,
                })?;
                nodes[slot]
                    .partitions
                    .entry(name.clone())
                    .or_default()
                    .insert(partition as u32);
                resolved.push(slot);
            }
            stores.insert(
                name,
                StoreAssignment {
                    spec,
                    owners: resolved,
                },
            );
        }

        Ok(AssignmentSnapshot {
            version: 0,
            nodes,
            stores,
        })
    }
}

/// Holder of the current snapshot.
///
/// Readers clone the `Arc` under a read lock held for a pointer copy only;
/// `install` swaps in a fully built snapshot and stamps the next version.
#[derive(Default)]
pub struct AssignmentTable {
    current: RwLock<Arc<AssignmentSnapshot>>,
}

impl AssignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<AssignmentSnapshot> {
        self.current.read().clone()
    }

    pub fn install(
        &self,
        builder: AssignmentBuilder,
    ) -> Result<Arc<AssignmentSnapshot>, AssignmentError> {
        let mut snapshot = builder.build()?;
        let mut current = self.current.write();
        snapshot.version = current.version + 1;
        let snapshot = Arc::new(snapshot);
        *current = snapshot.clone();
        Ok(snapshot)
    }

    pub fn owner_of(&self, store: &str, partition: u32) -> Result<NodeInfo, AssignmentError> {
        self.snapshot().owner_of(store, partition).cloned()
    }

    pub fn partitions_of(&self, store: &str) -> Result<Vec<u32>, AssignmentError> {
        self.snapshot().partitions_of(store)
    }
}
