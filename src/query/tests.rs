//! Query Module Tests
//!
//! ## Test Scopes
//! - **Façade**: local serving, redirects, not-found vs not-local, unreachable owners.
//! - **REST**: routes, status mapping and relaying, driven in-process through
//!   `tower::ServiceExt::oneshot`, plus one relay to a real listening node.

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value as Json, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::config::ForwardingConfig;
    use crate::directory::assignment::{AssignmentBuilder, MemberEndpoint};
    use crate::directory::catalog::StoreCatalog;
    use crate::directory::cluster::ClusterDirectory;
    use crate::directory::partitioner::partition_for_key;
    use crate::error::StateError;
    use crate::membership::types::NodeId;
    use crate::query::forward::Forwarder;
    use crate::query::handlers::router;
    use crate::query::protocol::FORWARDED_HEADER;
    use crate::query::service::{QueryService, Routed};
    use crate::store::engine::StoreEngine;
    use crate::store::types::{Entry, StoreSpec, Value, ValueType};

    const WORD_COUNTS: &str = "wordCounts";
    const COUNTS: &str = "counts";

    fn catalog() -> Arc<StoreCatalog> {
        Arc::new(
            StoreCatalog::new(vec![
                StoreSpec::key_value(WORD_COUNTS, 2, ValueType::Long),
                StoreSpec::windowed(COUNTS, 2, ValueType::Long, 10, 1000),
            ])
            .unwrap(),
        )
    }

    fn endpoint(id: &str, port: u16) -> MemberEndpoint {
        MemberEndpoint {
            id: NodeId(id.to_string()),
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    fn key_in_partition(partition: u32) -> String {
        (0..1000)
            .map(|i| format!("key-{}", i))
            .find(|k| partition_for_key(k, 2) == partition)
            .unwrap()
    }

    /// Node `local` of a cluster of A and B; `owners[p]` owns partition `p` of every store.
    fn node(local: &str, owners: [&str; 2], a_port: u16, b_port: u16) -> Arc<QueryService> {
        let catalog = catalog();
        let directory = Arc::new(ClusterDirectory::new(NodeId(local.into()), catalog.clone()));

        let mut builder = AssignmentBuilder::new();
        builder.add_node(endpoint("A", a_port)).unwrap();
        builder.add_node(endpoint("B", b_port)).unwrap();
        for spec in catalog.specs() {
            builder.add_store(spec.clone());
            for (partition, owner) in owners.iter().enumerate() {
                builder
                    .assign(&spec.name, partition as u32, &NodeId(owner.to_string()))
                    .unwrap();
            }
        }
        directory.install(builder).unwrap();

        let engine = Arc::new(StoreEngine::new());
        engine.sync_assignment(&directory.local_assignment());
        Arc::new(QueryService::new(directory, engine))
    }

    /// One node owning everything, loaded with the word-count and window fixtures.
    fn single_node() -> Arc<QueryService> {
        let query = node("A", ["A", "A"], 7001, 7002);
        let engine = query.engine();
        for (key, count) in [("a", 3), ("b", 7), ("c", 2)] {
            engine
                .apply_update(WORD_COUNTS, key, Value::Long(count), None)
                .unwrap();
        }
        for (start, count) in [(0, 1), (10, 2), (20, 3)] {
            engine
                .apply_update(COUNTS, "x", Value::Long(count), Some(start))
                .unwrap();
        }
        query
    }

    fn forwarder() -> Arc<Forwarder> {
        Arc::new(Forwarder::new(&ForwardingConfig {
            timeout_ms: 200,
            attempts: 1,
        }))
    }

    async fn call(app: Router, uri: &str, forwarded: bool) -> (StatusCode, Json) {
        let mut request = Request::builder().uri(uri);
        if forwarded {
            request = request.header(FORWARDED_HEADER, "1");
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // ============================================================
    // FAÇADE
    // ============================================================

    #[test]
    fn test_word_counts_scenario() {
        let query = single_node();

        let entries: Vec<Entry> = match query.range(WORD_COUNTS, "a", "b").unwrap() {
            Routed::Local(iter) => iter.collect(),
            Routed::Redirect(owner) => panic!("unexpected redirect to {}", owner.id),
        };
        assert_eq!(
            entries,
            vec![
                Entry::plain("a".into(), Value::Long(3)),
                Entry::plain("b".into(), Value::Long(7)),
            ]
        );

        assert!(matches!(
            query.get(WORD_COUNTS, "z"),
            Err(StateError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_counts_window_scenario() {
        let query = single_node();

        let windows: Vec<(i64, Value)> = match query.fetch_window(COUNTS, "x", 5, 20).unwrap() {
            Routed::Local(iter) => iter.collect(),
            Routed::Redirect(_) => panic!("unexpected redirect"),
        };
        assert_eq!(windows, vec![(10, Value::Long(2)), (20, Value::Long(3))]);
    }

    #[test]
    fn test_remote_key_redirects_to_owner() {
        let query = node("A", ["A", "B"], 7001, 7002);

        match query.get(WORD_COUNTS, &key_in_partition(1)).unwrap() {
            Routed::Redirect(owner) => {
                assert_eq!(owner.id, NodeId("B".into()));
                assert_eq!(owner.port, 7002);
            }
            Routed::Local(_) => panic!("partition 1 belongs to B"),
        }
        assert!(query.get(WORD_COUNTS, &key_in_partition(0)).is_err_and(
            |e| matches!(e, StateError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_unknown_store_is_not_found() {
        let query = single_node();

        assert_eq!(
            query.get("nope", "a").map(|r| r.is_local()),
            Err(StateError::StoreNotFound("nope".into()))
        );
        assert!(matches!(query.all("nope"), Err(StateError::StoreNotFound(_))));
        assert!(matches!(
            query.nodes_for_store("nope"),
            Err(StateError::StoreNotFound(_))
        ));
    }

    #[test]
    fn test_scan_redirects_when_nothing_is_hosted_here() {
        let query = node("A", ["B", "B"], 7001, 7002);

        match query.all(WORD_COUNTS).unwrap() {
            Routed::Redirect(owner) => assert_eq!(owner.id, NodeId("B".into())),
            Routed::Local(_) => panic!("A hosts nothing"),
        }
    }

    #[test]
    fn test_owned_but_not_yet_synced_is_not_local() {
        let query = node("A", ["A", "A"], 7001, 7002);
        let unsynced = QueryService::new(query.directory().clone(), Arc::new(StoreEngine::new()));

        assert!(matches!(
            unsynced.get(WORD_COUNTS, "a"),
            Err(StateError::StoreNotLocal { .. })
        ));
    }

    #[test]
    fn test_report_unreachable_takes_over_partitions() {
        let query = node("A", ["A", "B"], 7001, 7002);
        let key = key_in_partition(1);

        let report = query.report_unreachable(&NodeId("B".into())).unwrap();
        assert_eq!(report.assigned.len(), 2);
        assert_eq!(query.all_nodes().len(), 1);
        assert!(matches!(
            query.get(WORD_COUNTS, &key),
            Err(StateError::KeyNotFound { .. })
        ));

        // Already gone: nothing left to do.
        assert!(query.report_unreachable(&NodeId("B".into())).is_none());
    }

    #[test]
    fn test_late_resync_cannot_undo_takeover() {
        let query = node("A", ["A", "B"], 7001, 7002);
        let key = key_in_partition(1);

        // A rebalance read its placement, then lost the race to a takeover.
        let earlier = query.directory().local_assignment();
        query.report_unreachable(&NodeId("B".into())).unwrap();
        let report = query.engine().sync_assignment(&earlier);

        assert!(report.is_empty());
        assert_eq!(query.engine().hosted_partitions()[WORD_COUNTS], vec![0, 1]);
        assert!(matches!(
            query.get(WORD_COUNTS, &key),
            Err(StateError::KeyNotFound { .. })
        ));
    }

    // ============================================================
    // REST
    // ============================================================

    #[tokio::test]
    async fn test_http_point_get() {
        let app = router(single_node(), forwarder());

        let (status, body) = call(app.clone(), "/state/keyvalue/wordCounts/a", false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"key": "a", "value": 3}));

        let (status, body) = call(app.clone(), "/state/keyvalue/wordCounts/z", false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("'z'"));

        let (status, _) = call(app, "/state/keyvalue/nope/a", false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_http_scans() {
        let app = router(single_node(), forwarder());

        let (status, body) = call(app.clone(), "/state/keyvalues/wordCounts/range/a/b", false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{"key": "a", "value": 3}, {"key": "b", "value": 7}])
        );

        let (_, body) = call(app.clone(), "/state/keyvalues/wordCounts/all", false).await;
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (_, body) = call(app, "/state/keyvalues/counts/all", false).await;
        assert_eq!(body[0], json!({"key": "x", "window_start": 0, "value": 1}));
    }

    #[tokio::test]
    async fn test_http_windowed_fetch() {
        let app = router(single_node(), forwarder());

        let (status, body) = call(app.clone(), "/state/windowed/counts/x/5/20", false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                {"key": "x", "window_start": 10, "value": 2},
                {"key": "x", "window_start": 20, "value": 3}
            ])
        );

        let (status, _) = call(app, "/state/windowed/wordCounts/x/0/10", false).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_http_instances() {
        let app = router(node("A", ["A", "B"], 7001, 7002), forwarder());

        let (_, body) = call(app.clone(), "/state/instances", false).await;
        assert_eq!(
            body,
            json!([
                {"host": "127.0.0.1", "port": 7001, "store_names": ["counts", "wordCounts"]},
                {"host": "127.0.0.1", "port": 7002, "store_names": ["counts", "wordCounts"]}
            ])
        );

        let (_, body) = call(app.clone(), "/state/instances/wordCounts", false).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let uri = format!("/state/instance/wordCounts/{}", key_in_partition(1));
        let (status, body) = call(app.clone(), &uri, false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["port"], 7002);

        let (status, _) = call(app, "/state/instances/nope", false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_http_forwarded_request_is_served_locally() {
        let app = router(node("A", ["A", "B"], 7001, 7002), forwarder());

        let uri = format!("/state/keyvalue/wordCounts/{}", key_in_partition(1));
        let (status, _) = call(app, &uri, true).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_http_unreachable_owner_is_dropped() {
        // Nothing listens on port 1.
        let query = node("A", ["A", "B"], 7001, 1);
        let app = router(query.clone(), forwarder());
        let uri = format!("/state/keyvalue/wordCounts/{}", key_in_partition(1));

        let (status, body) = call(app.clone(), &uri, false).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("unreachable"));
        assert_eq!(query.all_nodes().len(), 1);

        // A now owns the partition itself.
        let (status, _) = call(app, &uri, false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_http_relays_to_owner() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b_port = listener.local_addr().unwrap().port();
        let key = key_in_partition(1);

        let b = node("B", ["A", "B"], 7001, b_port);
        b.engine()
            .apply_update(WORD_COUNTS, &key, Value::Long(42), None)
            .unwrap();
        let b_app = router(b, forwarder());
        tokio::spawn(async move { axum::serve(listener, b_app).await });

        let a_app = router(node("A", ["A", "B"], 7001, b_port), forwarder());
        let (status, body) = call(a_app, &format!("/state/keyvalue/wordCounts/{}", key), false).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"key": key, "value": 42}));
    }
}
