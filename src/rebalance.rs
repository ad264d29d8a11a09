//! Keeps partition ownership in step with cluster membership.
//!
//! On every topology change the rebalancer recomputes the assignment from the
//! live members, installs it in the directory and resyncs the local engine.

use std::sync::Arc;
use tokio::sync::watch;

use crate::directory::assignment::{AssignmentError, MemberEndpoint};
use crate::directory::cluster::ClusterDirectory;
use crate::store::engine::{StoreEngine, SyncReport};

pub struct Rebalancer {
    directory: Arc<ClusterDirectory>,
    engine: Arc<StoreEngine>,
}

impl Rebalancer {
    pub fn new(directory: Arc<ClusterDirectory>, engine: Arc<StoreEngine>) -> Self {
        Self { directory, engine }
    }

    /// Installs the assignment for `members` and creates/drops local partitions.
    pub fn apply(&self, members: Vec<MemberEndpoint>) -> Result<SyncReport, AssignmentError> {
        let snapshot = self.directory.rebalance(members)?;
        let report = self
            .engine
            .sync_assignment(&self.directory.local_assignment());

        if !report.is_empty() {
            tracing::info!(
                "Assignment v{}: +{} / -{} local partition(s)",
                snapshot.version(),
                report.assigned.len(),
                report.revoked.len()
            );
        }
        Ok(report)
    }

    /// Rebalances once immediately, then after every topology change until the
    /// sender is dropped.
    pub async fn run<F>(self, mut topology: watch::Receiver<u64>, members: F)
    where
        F: Fn() -> Vec<MemberEndpoint>,
    {
        loop {
            let version = *topology.borrow_and_update();
            match self.apply(members()) {
                Ok(_) => tracing::debug!("Rebalanced for topology v{}", version),
                Err(e) => tracing::error!("Rebalance for topology v{} failed: {}", version, e),
            }

            if topology.changed().await.is_err() {
                tracing::info!("Membership stopped, rebalancer exiting");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::catalog::StoreCatalog;
    use crate::membership::types::NodeId;
    use crate::store::types::{StoreSpec, ValueType};
    use std::time::Duration;

    fn member(id: &str) -> MemberEndpoint {
        MemberEndpoint {
            id: NodeId(id.to_string()),
            host: "127.0.0.1".into(),
            port: 7000,
        }
    }

    fn setup() -> (Arc<ClusterDirectory>, Arc<StoreEngine>) {
        let catalog = Arc::new(
            StoreCatalog::new(vec![StoreSpec::key_value("s", 4, ValueType::Long)]).unwrap(),
        );
        (
            Arc::new(ClusterDirectory::new(NodeId("a".into()), catalog)),
            Arc::new(StoreEngine::new()),
        )
    }

    #[test]
    fn test_apply_syncs_engine_with_assignment() {
        let (directory, engine) = setup();
        let rebalancer = Rebalancer::new(directory.clone(), engine.clone());

        let report = rebalancer.apply(vec![member("a")]).unwrap();
        assert_eq!(report.assigned.len(), 4);
        assert_eq!(engine.hosted_partitions()["s"], vec![0, 1, 2, 3]);

        let report = rebalancer.apply(vec![member("a"), member("b")]).unwrap();
        assert_eq!(report.revoked, vec![("s".to_string(), 1), ("s".to_string(), 3)]);
        assert_eq!(engine.hosted_partitions()["s"], vec![0, 2]);
    }

    #[test]
    fn test_apply_without_members_fails() {
        let (directory, engine) = setup();
        let rebalancer = Rebalancer::new(directory, engine);
        assert_eq!(
            rebalancer.apply(vec![]).unwrap_err(),
            AssignmentError::NoMembers
        );
    }

    #[tokio::test]
    async fn test_run_follows_topology_changes() {
        let (directory, engine) = setup();
        let (tx, rx) = watch::channel(0u64);
        let view = Arc::new(parking_lot::Mutex::new(vec![member("a"), member("b")]));

        let members = view.clone();
        let task = tokio::spawn(
            Rebalancer::new(directory.clone(), engine.clone()).run(rx, move || members.lock().clone()),
        );

        let wait_for = |expected: usize| {
            let engine = engine.clone();
            async move {
                for _ in 0..100 {
                    if engine.hosted_partitions().get("s").map(Vec::len) == Some(expected) {
                        return true;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                false
            }
        };

        assert!(wait_for(2).await);

        *view.lock() = vec![member("a")];
        tx.send_modify(|v| *v += 1);
        assert!(wait_for(4).await);

        drop(tx);
        task.await.unwrap();
    }
}
