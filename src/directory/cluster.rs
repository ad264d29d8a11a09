use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::assignment::{
    AssignmentBuilder, AssignmentError, AssignmentSnapshot, AssignmentTable, MemberEndpoint,
    NodeInfo,
};
use super::assignor;
use super::catalog::StoreCatalog;
use super::partitioner::KeyResolver;
use crate::error::{Result, StateError};
use crate::membership::types::NodeId;
use crate::store::engine::Placement;
use crate::store::types::StoreSpec;

/// Where the partition holding a key lives, relative to this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locality {
    Local { partition: u32 },
    Remote { partition: u32, owner: NodeInfo },
}

/// Cluster Metadata Directory: nodes, the stores they host, and routing.
///
/// Every lookup works against one snapshot taken at the start of the call.
pub struct ClusterDirectory {
    local: NodeId,
    catalog: Arc<StoreCatalog>,
    resolver: KeyResolver,
    table: AssignmentTable,
    /// Membership view the current snapshot was computed from.
    members: Mutex<Vec<MemberEndpoint>>,
}

impl ClusterDirectory {
    pub fn new(local: NodeId, catalog: Arc<StoreCatalog>) -> Self {
        Self {
            local,
            resolver: KeyResolver::new(catalog.clone()),
            catalog,
            table: AssignmentTable::new(),
            members: Mutex::new(Vec::new()),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn catalog(&self) -> &Arc<StoreCatalog> {
        &self.catalog
    }

    pub fn snapshot(&self) -> Arc<AssignmentSnapshot> {
        self.table.snapshot()
    }

    fn known_store(&self, store: &str) -> Result<&StoreSpec> {
        self.catalog
            .get(store)
            .ok_or_else(|| StateError::StoreNotFound(store.to_string()))
    }

    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        self.snapshot().nodes().to_vec()
    }

    /// Nodes owning at least one partition of `store`. `StoreNotFound` only
    /// when the store is unknown cluster-wide.
    pub fn nodes_for_store(&self, store: &str) -> Result<Vec<NodeInfo>> {
        self.known_store(store)?;
        Ok(self
            .snapshot()
            .nodes_for_store(store)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn resolve(&self, store: &str, key: &str) -> Result<u32> {
        self.resolver.resolve(store, key)
    }

    fn owner_for(&self, store: &str, key: &str) -> Result<(u32, NodeInfo)> {
        let partition = self.resolve(store, key)?;
        let owner = self
            .snapshot()
            .owner_of(store, partition)
            .cloned()
            .map_err(|_| StateError::KeyUnresolvable {
                store: store.to_string(),
                key: key.to_string(),
            })?;
        Ok((partition, owner))
    }

    pub fn node_for_key(&self, store: &str, key: &str) -> Result<NodeInfo> {
        self.owner_for(store, key).map(|(_, owner)| owner)
    }

    pub fn locate_key(&self, store: &str, key: &str) -> Result<Locality> {
        let (partition, owner) = self.owner_for(store, key)?;
        if owner.id == self.local {
            Ok(Locality::Local { partition })
        } else {
            Ok(Locality::Remote { partition, owner })
        }
    }

    /// Partitions of `store` this node owns in the current snapshot.
    pub fn local_partitions(&self, store: &str) -> Result<BTreeSet<u32>> {
        self.known_store(store)?;
        Ok(self
            .snapshot()
            .node(&self.local)
            .and_then(|n| n.partitions.get(store).cloned())
            .unwrap_or_default())
    }

    /// What this node should host under the current snapshot, tagged with its version.
    pub fn local_assignment(&self) -> Placement {
        let snapshot = self.snapshot();
        Placement::new(snapshot.version(), snapshot.assignment_for(&self.local))
    }

    /// Recomputes ownership for a new membership view and installs it.
    pub fn rebalance(
        &self,
        members: Vec<MemberEndpoint>,
    ) -> std::result::Result<Arc<AssignmentSnapshot>, AssignmentError> {
        let mut current = self.members.lock();
        let snapshot = self.table.install(assignor::round_robin(&self.catalog, &members)?)?;
        *current = members;
        tracing::info!(
            "Installed assignment v{} over {} node(s)",
            snapshot.version(),
            snapshot.nodes().len()
        );
        Ok(snapshot)
    }

    /// Installs an explicit assignment, bypassing the assignor.
    ///
    /// Every store in `builder` must match its catalog definition: the resolver
    /// and the engine both hash with the partition count.
    pub fn install(
        &self,
        builder: AssignmentBuilder,
    ) -> std::result::Result<Arc<AssignmentSnapshot>, AssignmentError> {
        for spec in builder.store_specs() {
            if self.catalog.get(&spec.name) != Some(spec) {
                return Err(AssignmentError::CatalogMismatch(spec.name.clone()));
            }
        }
        let snapshot = self.table.install(builder)?;
        *self.members.lock() = snapshot
            .nodes()
            .iter()
            .map(|n| MemberEndpoint {
                id: n.id.clone(),
                host: n.host.clone(),
                port: n.port,
            })
            .collect();
        Ok(snapshot)
    }

    /// Drops an unreachable node from the view and reassigns its partitions.
    ///
    /// Returns the new snapshot, or `None` when nothing changed (unknown node,
    /// or the local node itself).
    pub fn mark_unreachable(
        &self,
        node: &NodeId,
    ) -> std::result::Result<Option<Arc<AssignmentSnapshot>>, AssignmentError> {
        if node == &self.local {
            tracing::warn!("Refusing to mark the local node unreachable");
            return Ok(None);
        }

        let mut members = self.members.lock();
        let before = members.len();
        let remaining: Vec<MemberEndpoint> =
            members.iter().filter(|m| &m.id != node).cloned().collect();
        if remaining.len() == before {
            return Ok(None);
        }

        let snapshot = self
            .table
            .install(assignor::round_robin(&self.catalog, &remaining)?)?;
        *members = remaining;
        tracing::warn!(
            "Node {} marked unreachable, installed assignment v{}",
            node,
            snapshot.version()
        );
        Ok(Some(snapshot))
    }
}
