//! Cache backend contract against a real Redis server.
//!
//! Every test starts an ephemeral Redis container through testcontainers.

use std::sync::Arc;
use std::time::Duration;

use kc_cache::{CacheBackend, caches};
use kc_cache_redis::{RedisCacheBackend, RedisConfig};
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::redis::{REDIS_PORT, Redis};

/// A backend connected to its own Redis container.
struct TestRedis {
    _redis: ContainerAsync<Redis>,
    backend: Arc<RedisCacheBackend>,
}

impl TestRedis {
    async fn start() -> anyhow::Result<Self> {
        let redis = Redis::default().with_tag("7-alpine").start().await?;
        let port = redis.get_host_port_ipv4(REDIS_PORT).await?;

        let config = RedisConfig::new().url(format!("redis://127.0.0.1:{port}"));
        let backend = Arc::new(RedisCacheBackend::new(config).await?);
        Ok(Self {
            _redis: redis,
            backend,
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_remove_has_one_winner() -> anyhow::Result<()> {
    let redis = TestRedis::start().await?;
    redis
        .backend
        .put(caches::ACTION_TOKENS, "abc123", "{\"code\":1}".into(), Some(Duration::from_secs(60)))
        .await?;

    let consumers = (0..16).map(|_| {
        let backend = Arc::clone(&redis.backend);
        tokio::spawn(async move { backend.remove(caches::ACTION_TOKENS, "abc123").await })
    });

    let mut winners = Vec::new();
    for outcome in futures::future::join_all(consumers).await {
        winners.extend(outcome??);
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].value, "{\"code\":1}");
    assert!(redis.backend.get(caches::ACTION_TOKENS, "abc123").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn put_if_absent_refuses_an_existing_key() -> anyhow::Result<()> {
    let redis = TestRedis::start().await?;
    let backend = &redis.backend;

    assert!(backend.put_if_absent(caches::WORK, "task::sweep", "node-a".into(), None).await?);
    assert!(!backend.put_if_absent(caches::WORK, "task::sweep", "node-b".into(), None).await?);

    let stored = backend.get(caches::WORK, "task::sweep").await?;
    assert_eq!(stored.map(|v| v.value).as_deref(), Some("node-a"));
    Ok(())
}

#[tokio::test]
async fn replace_if_version_rejects_a_stale_version() -> anyhow::Result<()> {
    let redis = TestRedis::start().await?;
    let backend = &redis.backend;

    let first = backend.put(caches::SESSIONS, "s1", "v1".into(), None).await?;
    let second = backend
        .replace_if_version(caches::SESSIONS, "s1", "v2".into(), first, None)
        .await?
        .ok_or_else(|| anyhow::anyhow!("current version was rejected"))?;
    assert!(second > first);

    let stale = backend
        .replace_if_version(caches::SESSIONS, "s1", "v3".into(), first, None)
        .await?;
    assert_eq!(stale, None);
    assert!(!backend.remove_if_version(caches::SESSIONS, "s1", first).await?);

    let stored = backend.get(caches::SESSIONS, "s1").await?;
    assert_eq!(stored.map(|v| (v.value, v.version)), Some(("v2".to_string(), second)));
    assert!(backend.remove_if_version(caches::SESSIONS, "s1", second).await?);
    assert_eq!(
        backend.replace_if_version(caches::SESSIONS, "s1", "v4".into(), second, None).await?,
        None
    );
    Ok(())
}

#[tokio::test]
async fn entries_expire_after_their_lifespan() -> anyhow::Result<()> {
    let redis = TestRedis::start().await?;
    let backend = &redis.backend;

    backend
        .put(caches::ACTION_TOKENS, "short", "x".into(), Some(Duration::from_millis(200)))
        .await?;
    backend.put(caches::ACTION_TOKENS, "long", "y".into(), None).await?;
    assert!(backend.get(caches::ACTION_TOKENS, "short").await?.is_some());

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(backend.get(caches::ACTION_TOKENS, "short").await?.is_none());
    assert!(backend.remove(caches::ACTION_TOKENS, "short").await?.is_none());
    assert!(
        backend
            .put_if_absent(caches::ACTION_TOKENS, "short", "z".into(), None)
            .await?
    );
    assert_eq!(backend.keys(caches::ACTION_TOKENS).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn version_counter_is_not_an_entry() -> anyhow::Result<()> {
    let redis = TestRedis::start().await?;
    let backend = &redis.backend;

    let first = backend.put(caches::WORK, "version", "mine".into(), None).await?;
    let second = backend.put(caches::WORK, "other", "x".into(), None).await?;
    assert!(second > first);

    let stored = backend.get(caches::WORK, "version").await?;
    assert_eq!(stored.map(|v| (v.value, v.version)), Some(("mine".to_string(), first)));

    let mut keys = backend.keys(caches::WORK).await?;
    keys.sort();
    assert_eq!(keys, vec!["other".to_string(), "version".to_string()]);

    backend.clear(caches::WORK).await?;
    assert!(backend.keys(caches::WORK).await?.is_empty());
    let after_clear = backend.put(caches::WORK, "other", "y".into(), None).await?;
    assert!(after_clear > second);
    Ok(())
}
