//! Cluster-wide task execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use kc_cache::{CLUSTER_SPI, CacheError, ClusterProviderFactory};
use kc_integration_tests::TestCluster;

const NODES: usize = 5;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn task_runs_on_at_most_one_node_per_interval() -> anyhow::Result<()> {
    let cluster = Arc::new(TestCluster::start(NODES).await?);
    let runs = Arc::new(AtomicUsize::new(0));

    let attempts = (0..NODES).map(|index| {
        let cluster = Arc::clone(&cluster);
        let runs = Arc::clone(&runs);
        tokio::spawn(async move {
            let coordinator = cluster
                .node(index)
                .session_factory()
                .create()
                .provider::<ClusterProviderFactory>(CLUSTER_SPI)?;
            let outcome = coordinator
                .execute_if_not_executed("clearExpiredEvents", 60, || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(coordinator.node_name().to_string())
                })
                .await?;
            anyhow::Ok(outcome.into_result())
        })
    });

    let mut executed_on = Vec::new();
    for outcome in futures::future::join_all(attempts).await {
        executed_on.extend(outcome??);
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(executed_on.len(), 1);

    let holder = cluster
        .node(0)
        .session_factory()
        .create()
        .provider::<ClusterProviderFactory>(CLUSTER_SPI)?
        .lock_holder("clearExpiredEvents")
        .await?;
    assert_eq!(holder, executed_on.pop());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_task_keeps_the_interval_lock() -> anyhow::Result<()> {
    let cluster = TestCluster::start(2).await?;
    let first = cluster
        .node(0)
        .session_factory()
        .create()
        .provider::<ClusterProviderFactory>(CLUSTER_SPI)?;
    let second = cluster
        .node(1)
        .session_factory()
        .create()
        .provider::<ClusterProviderFactory>(CLUSTER_SPI)?;

    let failed = first
        .execute_if_not_executed("flaky", 60, || async {
            Err::<(), _>(CacheError::Internal("boom".to_string()))
        })
        .await;
    assert!(failed.is_err());

    let retried = second
        .execute_if_not_executed("flaky", 60, || async { Ok::<_, CacheError>(()) })
        .await?;
    assert!(!retried.is_executed());
    Ok(())
}
