use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use queryable_state::config::{NodeArgs, NodeConfig};
use queryable_state::directory::cluster::ClusterDirectory;
use queryable_state::membership::service::MembershipService;
use queryable_state::query::forward::Forwarder;
use queryable_state::query::handlers::router;
use queryable_state::query::service::QueryService;
use queryable_state::rebalance::Rebalancer;
use queryable_state::store::engine::StoreEngine;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = NodeArgs::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let config = NodeConfig::load(args.config.as_deref())?;
    let catalog = Arc::new(config.catalog().context("invalid store catalog")?);
    tracing::info!("Loaded {} store definition(s)", catalog.len());

    let http_addr = args.http_addr();
    tracing::info!("Starting node: gossip={} http={}", args.bind, http_addr);
    if args.seeds.is_empty() {
        tracing::info!("Starting as seed node (founder)");
    } else {
        tracing::info!("Seed nodes: {:?}", args.seeds);
    }

    // 1. Membership (UDP gossip):
    let membership = MembershipService::bind(
        args.bind,
        args.advertised_host(),
        http_addr.port(),
        args.seeds.clone(),
    )
    .await?;
    tracing::info!("Node ID: {}", membership.local_id());

    // 2. Directory, engine and rebalancer:
    let directory = Arc::new(ClusterDirectory::new(
        membership.local_id().clone(),
        catalog,
    ));
    let engine = Arc::new(StoreEngine::new());

    let rebalancer = Rebalancer::new(directory.clone(), engine.clone());
    let topology = membership.subscribe();
    let view = membership.clone();
    tokio::spawn(async move {
        rebalancer.run(topology, move || view.live_endpoints()).await;
    });

    membership.clone().start().await;

    // 3. Stats and retention reporter:
    let stats_engine = engine.clone();
    let stats_directory = directory.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REPORT_INTERVAL);

        loop {
            interval.tick().await;
            let evicted = stats_engine.evict_expired();
            if evicted > 0 {
                tracing::info!("Evicted {} expired window(s)", evicted);
            }

            let snapshot = stats_directory.snapshot();
            tracing::info!(
                "Cluster stats: assignment v{}, {} node(s), {} open scan(s)",
                snapshot.version(),
                snapshot.nodes().len(),
                stats_engine.open_iterators()
            );
            for store in stats_engine.stats() {
                tracing::info!(
                    "  - {} ({}) partitions={:?} entries={}",
                    store.name,
                    store.kind,
                    store.partitions,
                    store.entries
                );
            }
        }
    });

    // 4. HTTP server:
    let query = Arc::new(QueryService::new(directory, engine));
    let forwarder = Arc::new(Forwarder::new(&config.forwarding));
    let app = router(query, forwarder);

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", http_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
