//! Authorization decisions through a running node.

use std::sync::Arc;

use kc_authz::providers::config;
use kc_authz::{
    AUTHORIZATION_SPI, AuthorizationProviderFactory, AuthorizationRequest, DecisionStrategy,
    EvaluationContext, Identity, Policy, PermissionRequest, Resource, ResourceServer, Scope,
    policy_types,
};
use kc_core::Profile;
use kc_integration_tests::TestCluster;

const SERVER: &str = "photo-album";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn album_permissions_are_decided_per_scope() -> anyhow::Result<()> {
    let cluster = TestCluster::start(1).await?;
    let session = cluster.node(0).session_factory().create();
    let authorization = session.provider::<AuthorizationProviderFactory>(AUTHORIZATION_SPI)?;
    let store = authorization.store();

    let server = store.resource_servers().create(ResourceServer::new(SERVER))?;
    for scope in ["album:view", "album:delete"] {
        store.scopes().create(Scope::new(SERVER, scope))?;
    }
    store.resources().create(
        Resource::new(SERVER, "Alice Album")
            .with_type("urn:photo-album:resources:album")
            .with_scopes(["album:view", "album:delete"]),
    )?;

    let owner = store.policies().create(
        Policy::new(SERVER, "Only Owner", policy_types::USER).with_config(config::USERS, "alice"),
    )?;
    let admin = store.policies().create(
        Policy::new(SERVER, "Administrators", policy_types::ROLE)
            .with_config(config::ROLES, "photo-album/admin"),
    )?;
    store.policies().create(
        Policy::new(SERVER, "View Album", policy_types::SCOPE)
            .with_scopes(["album:view"])
            .with_decision_strategy(DecisionStrategy::Affirmative)
            .with_policies([owner.id.clone(), admin.id.clone()]),
    )?;
    store.policies().create(
        Policy::new(SERVER, "Delete Album", policy_types::SCOPE)
            .with_scopes(["album:delete"])
            .with_policies([owner.id.clone()]),
    )?;

    let request = || {
        AuthorizationRequest::all().with_permission(
            PermissionRequest::resource("Alice Album").with_scopes(["album:view", "album:delete"]),
        )
    };

    let alice = EvaluationContext::new(Identity::new("alice"));
    let granted = authorization
        .evaluator(Arc::clone(&server), &alice, request())
        .evaluate_granted()?;
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].resource_name.as_deref(), Some("Alice Album"));
    assert!(granted[0].scopes.contains("album:view"));
    assert!(granted[0].scopes.contains("album:delete"));

    let admin = EvaluationContext::new(
        Identity::new("bob").with_client_roles("photo-album", ["admin"]),
    );
    let granted = authorization
        .evaluator(Arc::clone(&server), &admin, request())
        .evaluate_granted()?;
    assert_eq!(granted.len(), 1);
    assert!(granted[0].scopes.contains("album:view"));
    assert!(!granted[0].scopes.contains("album:delete"));

    let stranger = EvaluationContext::new(Identity::new("mallory"));
    let granted = authorization
        .evaluator(server, &stranger, request())
        .evaluate_granted()?;
    assert!(granted.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn authorization_data_is_shared_between_sessions_of_a_node() -> anyhow::Result<()> {
    let cluster = TestCluster::start(1).await?;
    let factory = cluster.node(0).session_factory();

    let admin = factory.create();
    admin
        .provider::<AuthorizationProviderFactory>(AUTHORIZATION_SPI)?
        .store()
        .resource_servers()
        .create(ResourceServer::new(SERVER))?;

    let request = factory.create();
    let authorization = request.provider::<AuthorizationProviderFactory>(AUTHORIZATION_SPI)?;
    assert!(authorization.store().resource_servers().find_by_id(SERVER).is_some());
    assert!(!authorization.store().is_read_only());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn authorization_is_absent_when_the_feature_is_disabled() -> anyhow::Result<()> {
    let cluster = TestCluster::start_with(1, |config| {
        config.core.features = Profile::empty();
    })
    .await?;

    let session = cluster.node(0).session_factory().create();
    assert!(
        session
            .provider::<AuthorizationProviderFactory>(AUTHORIZATION_SPI)
            .is_err()
    );
    Ok(())
}
