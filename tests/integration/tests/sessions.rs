//! User and client sessions across nodes.

use std::time::Duration;

use kc_integration_tests::TestCluster;
use kc_session::{USER_SESSION_SPI, UserSession, UserSessionProviderFactory};
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_detaches_client_sessions_seen_by_other_nodes() -> anyhow::Result<()> {
    let cluster = TestCluster::start(2).await?;
    let mut user_session = UserSession::new(Uuid::now_v7(), Uuid::now_v7());

    let login = cluster.node(0).session_factory().create();
    let sessions = login.provider::<UserSessionProviderFactory>(USER_SESSION_SPI)?;
    sessions.add_user_session(&user_session)?;
    let portal = sessions
        .create_client_session(&mut user_session, "portal", "openid-connect")
        .await?;
    let admin = sessions
        .create_client_session(&mut user_session, "admin-console", "openid-connect")
        .await?;
    login.transaction_manager().commit().await?;

    let relogin = cluster.node(1).session_factory().create();
    let sessions = relogin.provider::<UserSessionProviderFactory>(USER_SESSION_SPI)?;
    let mut loaded = sessions.require_user_session(user_session.id).await?;
    assert_eq!(sessions.client_session_mapping(&loaded).await?.len(), 2);
    sessions.restart_user_session(&mut loaded).await?;
    relogin.transaction_manager().commit().await?;

    let check = cluster.node(0).session_factory().create();
    let sessions = check.provider::<UserSessionProviderFactory>(USER_SESSION_SPI)?;
    let restarted = sessions.require_user_session(user_session.id).await?;
    assert!(restarted.client_sessions.is_empty());
    assert!(sessions.client_session_mapping(&restarted).await?.is_empty());
    for id in [portal.id, admin.id] {
        let client_session = sessions
            .get_client_session(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("client session {id} vanished"))?;
        assert!(!client_session.is_attached_to(user_session.id));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rolled_back_writes_are_not_visible() -> anyhow::Result<()> {
    let cluster = TestCluster::start(1).await?;
    let user_session = UserSession::new(Uuid::now_v7(), Uuid::now_v7());

    let session = cluster.node(0).session_factory().create();
    session
        .provider::<UserSessionProviderFactory>(USER_SESSION_SPI)?
        .add_user_session(&user_session)?;
    session.transaction_manager().rollback().await?;

    let check = cluster.node(0).session_factory().create();
    let sessions = check.provider::<UserSessionProviderFactory>(USER_SESSION_SPI)?;
    assert!(sessions.get_user_session(user_session.id).await?.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_sessions_are_swept_by_the_cluster() -> anyhow::Result<()> {
    let cluster = TestCluster::start_with(3, |config| {
        config.core.session.idle_timeout_secs = 1;
    })
    .await?;

    let mut stale = UserSession::new(Uuid::now_v7(), Uuid::now_v7());
    stale.last_activity -= chrono::Duration::seconds(30);
    let fresh = UserSession::new(Uuid::now_v7(), Uuid::now_v7());

    let session = cluster.node(0).session_factory().create();
    let sessions = session.provider::<UserSessionProviderFactory>(USER_SESSION_SPI)?;
    sessions.add_user_session(&stale)?;
    sessions.add_user_session(&fresh)?;
    session.transaction_manager().commit().await?;

    let tasks: Vec<_> = cluster
        .nodes()
        .iter()
        .flat_map(|node| node.start_maintenance())
        .collect();
    tokio::time::sleep(Duration::from_millis(300)).await;
    for task in &tasks {
        task.abort();
    }

    let check = cluster.node(2).session_factory().create();
    let sessions = check.provider::<UserSessionProviderFactory>(USER_SESSION_SPI)?;
    assert!(sessions.get_user_session(stale.id).await?.is_none());
    assert!(sessions.get_user_session(fresh.id).await?.is_some());
    Ok(())
}
