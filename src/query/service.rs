use std::sync::Arc;

use super::lifecycle::{Completed, Request};
use crate::directory::assignment::NodeInfo;
use crate::directory::cluster::{ClusterDirectory, Locality};
use crate::error::{Result, StateError};
use crate::membership::types::NodeId;
use crate::store::engine::{StoreEngine, SyncReport};
use crate::store::iter::{EntryIter, WindowIter};
use crate::store::types::Value;

/// Outcome of a routed read: served here, or the node the caller should ask.
#[derive(Debug)]
pub enum Routed<T> {
    Local(T),
    Redirect(NodeInfo),
}

impl<T> Routed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Routed<U> {
        match self {
            Routed::Local(value) => Routed::Local(f(value)),
            Routed::Redirect(owner) => Routed::Redirect(owner),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Routed::Local(_))
    }
}

/// Query Façade: the uniform read API over the directory and the local engine.
///
/// Point reads go to the owner of the key's partition. Scans are served over
/// the partitions hosted here, or redirected to a node hosting some when this
/// node hosts none. The façade never performs network I/O itself.
pub struct QueryService {
    directory: Arc<ClusterDirectory>,
    engine: Arc<StoreEngine>,
}

impl QueryService {
    pub fn new(directory: Arc<ClusterDirectory>, engine: Arc<StoreEngine>) -> Self {
        Self { directory, engine }
    }

    pub fn directory(&self) -> &Arc<ClusterDirectory> {
        &self.directory
    }

    pub fn engine(&self) -> &Arc<StoreEngine> {
        &self.engine
    }

    pub fn local_id(&self) -> &NodeId {
        self.directory.local_id()
    }

    pub fn get(&self, store: &str, key: &str) -> Result<Routed<Value>> {
        self.route_key("get", store, key, |this| this.local_get(store, key))
            .into_result()
    }

    pub fn range(&self, store: &str, from: &str, to: &str) -> Result<Routed<EntryIter>> {
        self.route_scan("range", store, |this| this.local_range(store, from, to))
            .into_result()
    }

    pub fn all(&self, store: &str) -> Result<Routed<EntryIter>> {
        self.route_scan("all", store, |this| this.local_all(store))
            .into_result()
    }

    pub fn fetch_window(
        &self,
        store: &str,
        key: &str,
        from: i64,
        to: i64,
    ) -> Result<Routed<WindowIter>> {
        self.route_key("fetch_window", store, key, |this| {
            this.local_fetch_window(store, key, from, to)
        })
        .into_result()
    }

    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        self.directory.all_nodes()
    }

    pub fn nodes_for_store(&self, store: &str) -> Result<Vec<NodeInfo>> {
        self.directory.nodes_for_store(store)
    }

    pub fn node_for_key(&self, store: &str, key: &str) -> Result<NodeInfo> {
        self.directory.node_for_key(store, key)
    }

    // Local serving. Also used directly for requests another node already routed here.

    pub fn local_get(&self, store: &str, key: &str) -> Result<Value> {
        self.hosted(|engine| engine.get(store, key))
    }

    pub fn local_range(&self, store: &str, from: &str, to: &str) -> Result<EntryIter> {
        self.hosted(|engine| engine.range(store, from, to))
    }

    pub fn local_all(&self, store: &str) -> Result<EntryIter> {
        self.hosted(|engine| engine.all(store))
    }

    pub fn local_fetch_window(
        &self,
        store: &str,
        key: &str,
        from: i64,
        to: i64,
    ) -> Result<WindowIter> {
        self.hosted(|engine| engine.fetch_window(store, key, from, to))
    }

    /// Drops an owner that could not be contacted and resyncs local partitions
    /// against the recomputed assignment.
    pub fn report_unreachable(&self, node: &NodeId) -> Option<SyncReport> {
        match self.directory.mark_unreachable(node) {
            Ok(Some(_)) => Some(
                self.engine
                    .sync_assignment(&self.directory.local_assignment()),
            ),
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Could not reassign partitions of {}: {}", node, e);
                None
            }
        }
    }

    /// Runs a local read, reporting a store that is in the catalog but has no
    /// partition here yet as `StoreNotLocal` rather than `StoreNotFound`.
    fn hosted<T>(&self, read: impl FnOnce(&StoreEngine) -> Result<T>) -> Result<T> {
        read(&self.engine).map_err(|e| match e {
            StateError::StoreNotFound(store) if self.directory.catalog().contains(&store) => {
                StateError::StoreNotLocal {
                    store,
                    partition: None,
                }
            }
            other => other,
        })
    }

    fn route_key<T>(
        &self,
        operation: &'static str,
        store: &str,
        key: &str,
        serve: impl FnOnce(&Self) -> Result<T>,
    ) -> Completed<Routed<T>> {
        let request = Request::received(operation, store).resolve_locality();
        match self.directory.locate_key(store, key) {
            Ok(Locality::Local { .. }) => request.serve_locally().respond(serve(self).map(Routed::Local)),
            Ok(Locality::Remote { owner, .. }) => {
                request.redirect(&owner).respond(Ok(Routed::Redirect(owner)))
            }
            Err(e) => request.fail(e),
        }
    }

    fn route_scan<T>(
        &self,
        operation: &'static str,
        store: &str,
        serve: impl FnOnce(&Self) -> Result<T>,
    ) -> Completed<Routed<T>> {
        let request = Request::received(operation, store).resolve_locality();
        let local = match self.directory.local_partitions(store) {
            Ok(partitions) => !partitions.is_empty(),
            Err(e) => return request.fail(e),
        };
        if local {
            return request.serve_locally().respond(serve(self).map(Routed::Local));
        }

        match self.directory.nodes_for_store(store) {
            Ok(nodes) => match nodes.into_iter().next() {
                Some(owner) => request.redirect(&owner).respond(Ok(Routed::Redirect(owner))),
                None => request.fail(StateError::StoreNotLocal {
                    store: store.to_string(),
                    partition: None,
                }),
            },
            Err(e) => request.fail(e),
        }
    }
}
