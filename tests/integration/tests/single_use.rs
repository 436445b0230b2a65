//! Single-use objects shared across cluster nodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kc_cache::{SINGLE_USE_OBJECT_SPI, SingleUseObjectProviderFactory};
use kc_integration_tests::TestCluster;

const CONSUMERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn authorization_code_is_consumed_once() -> anyhow::Result<()> {
    let cluster = TestCluster::start(2).await?;
    let issuer = cluster.node(0).session_factory().create();
    let codes = issuer.provider::<SingleUseObjectProviderFactory>(SINGLE_USE_OBJECT_SPI)?;

    let notes = HashMap::from([("redirect_uri".to_string(), "https://app/cb".to_string())]);
    codes.put("abc123", 60, &notes).await?;

    // the other node sees the code
    let redeemer = cluster.node(1).session_factory().create();
    let tracker = redeemer.provider::<SingleUseObjectProviderFactory>(SINGLE_USE_OBJECT_SPI)?;
    assert_eq!(tracker.get("abc123").await?, Some(notes.clone()));

    assert_eq!(tracker.remove("abc123").await?, Some(notes));
    assert_eq!(codes.remove("abc123").await?, None);
    assert!(!tracker.contains("abc123").await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_on_all_nodes_have_one_winner() -> anyhow::Result<()> {
    let cluster = Arc::new(TestCluster::start(4).await?);
    let session = cluster.node(0).session_factory().create();
    session
        .provider::<SingleUseObjectProviderFactory>(SINGLE_USE_OBJECT_SPI)?
        .put("abc123", 60, &HashMap::new())
        .await?;

    let consumers = (0..CONSUMERS).map(|index| {
        let cluster = Arc::clone(&cluster);
        tokio::spawn(async move {
            let node = cluster.node(index % cluster.nodes().len());
            let tracker = node
                .session_factory()
                .create()
                .provider::<SingleUseObjectProviderFactory>(SINGLE_USE_OBJECT_SPI)?;
            anyhow::Ok(tracker.remove("abc123").await?.is_some())
        })
    });

    let mut winners = 0;
    for outcome in futures::future::join_all(consumers).await {
        if outcome?? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn code_expires_after_its_lifespan() -> anyhow::Result<()> {
    let cluster = TestCluster::start(1).await?;
    let session = cluster.node(0).session_factory().create();
    let tracker = session.provider::<SingleUseObjectProviderFactory>(SINGLE_USE_OBJECT_SPI)?;

    tracker.put("short-lived", 1, &HashMap::new()).await?;
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    assert_eq!(tracker.remove("short-lived").await?, None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn revocation_is_visible_to_every_node() -> anyhow::Result<()> {
    let cluster = TestCluster::start(2).await?;
    let revoking = cluster.node(0).session_factory().create();
    revoking
        .provider::<SingleUseObjectProviderFactory>(SINGLE_USE_OBJECT_SPI)?
        .revoke("token-1", 300)
        .await?;

    let checking = cluster.node(1).session_factory().create();
    let tracker = checking.provider::<SingleUseObjectProviderFactory>(SINGLE_USE_OBJECT_SPI)?;
    assert!(tracker.is_revoked("token-1").await?);
    assert!(!tracker.is_revoked("token-2").await?);
    Ok(())
}
