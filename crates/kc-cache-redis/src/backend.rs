//! Redis cache backend implementation.
//!
//! Each entry is a Redis hash with the fields `d` (serialized value) and
//! `v` (version). Versions come from one counter per cache, kept outside
//! the entry key space, and every
//! conditional operation is a Lua script so it executes atomically on the
//! server. Keys of one cache share a hash tag, keeping entry and counter in
//! the same slot in cluster mode.

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::scan::Scanner;
use futures::TryStreamExt;
use kc_cache::{CacheBackend, CacheError, CacheResult, VersionedValue};

use crate::config::RedisConfig;
use crate::error::from_redis_error;

const VERSION_COUNTER: &str = "version";

const PUT_SCRIPT: &str = r"
local v = redis.call('INCR', KEYS[2])
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], 'd', ARGV[1], 'v', v)
if tonumber(ARGV[2]) > 0 then redis.call('PEXPIRE', KEYS[1], ARGV[2]) end
return v
";

const PUT_IF_ABSENT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
local v = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'd', ARGV[1], 'v', v)
if tonumber(ARGV[2]) > 0 then redis.call('PEXPIRE', KEYS[1], ARGV[2]) end
return 1
";

const REPLACE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
if ARGV[3] ~= '' and redis.call('HGET', KEYS[1], 'v') ~= ARGV[3] then return 0 end
local v = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'd', ARGV[1], 'v', v)
if tonumber(ARGV[2]) > 0 then redis.call('PEXPIRE', KEYS[1], ARGV[2]) end
return v
";

const TAKE_SCRIPT: &str = r"
local e = redis.call('HMGET', KEYS[1], 'd', 'v')
if not e[1] then return {} end
redis.call('DEL', KEYS[1])
return {e[1], e[2]}
";

const REMOVE_IF_VERSION_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'v') == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
";

/// Redis-based [`CacheBackend`].
pub struct RedisCacheBackend {
    client: Client,
    config: RedisConfig,
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("url", &self.config.redacted_url())
            .field("key_prefix", &self.config.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisCacheBackend {
    /// Connects to Redis.
    ///
    /// ## Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn new(config: RedisConfig) -> CacheResult<Self> {
        let redis_config = Config::from_url(&config.url)
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        let performance = PerformanceConfig {
            default_command_timeout: Duration::from_millis(config.command_timeout_ms),
            ..PerformanceConfig::default()
        };
        let connection = ConnectionConfig {
            connection_timeout: Duration::from_millis(config.connect_timeout_ms),
            ..ConnectionConfig::default()
        };
        let client = Client::new(
            redis_config,
            Some(performance),
            Some(connection),
            Some(ReconnectPolicy::new_exponential(
                config.reconnect.max_attempts,
                config.reconnect.min_delay_ms,
                config.reconnect.max_delay_ms,
                2,
            )),
        );

        client.init().await.map_err(from_redis_error)?;
        tracing::info!("Connected to Redis cache backend at {}", config.redacted_url());

        Ok(Self { client, config })
    }

    /// Returns the underlying Redis client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    fn entry_key(&self, cache: &str, key: &str) -> String {
        self.config.entry_key(cache, key)
    }

    fn counter_key(&self, cache: &str) -> String {
        self.config.meta_key(cache, VERSION_COUNTER)
    }

    fn keys_for(&self, cache: &str, key: &str) -> Vec<String> {
        vec![self.entry_key(cache, key), self.counter_key(cache)]
    }

    /// Collects the entry keys of one cache, without the key prefix.
    async fn scan_keys(&self, cache: &str) -> CacheResult<Vec<String>> {
        let prefix = self.entry_key(cache, "");
        let mut scanner = self.client.scan(self.config.cache_pattern(cache), None, None);
        let mut keys = Vec::new();

        while let Some(result) = scanner.try_next().await.map_err(from_redis_error)? {
            if let Some(page) = result.results() {
                for value in page {
                    if let Some(key) = value.as_str().and_then(|s| s.strip_prefix(&prefix)) {
                        keys.push(key.to_string());
                    }
                }
            }
        }

        Ok(keys)
    }
}

fn lifespan_ms(lifespan: Option<Duration>) -> String {
    lifespan
        .map_or(0, |l| l.as_millis().max(1))
        .to_string()
}

fn parse_version(raw: &str) -> CacheResult<u64> {
    raw.parse()
        .map_err(|_| CacheError::Internal(format!("invalid entry version '{raw}'")))
}

#[allow(clippy::cast_sign_loss)]
const fn version_from_reply(reply: i64) -> Option<u64> {
    if reply > 0 { Some(reply as u64) } else { None }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, cache: &str, key: &str) -> CacheResult<Option<VersionedValue>> {
        let fields: Vec<Option<String>> = self
            .client
            .hmget(self.entry_key(cache, key), vec!["d", "v"])
            .await
            .map_err(from_redis_error)?;

        match fields.as_slice() {
            [Some(value), Some(version)] => Ok(Some(VersionedValue {
                value: value.clone(),
                version: parse_version(version)?,
            })),
            _ => Ok(None),
        }
    }

    async fn put(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<u64> {
        let version: i64 = self
            .client
            .eval(
                PUT_SCRIPT,
                self.keys_for(cache, key),
                vec![value, lifespan_ms(lifespan)],
            )
            .await
            .map_err(from_redis_error)?;
        version_from_reply(version)
            .ok_or_else(|| CacheError::Internal(format!("invalid version reply {version}")))
    }

    async fn put_if_absent(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<bool> {
        let stored: i64 = self
            .client
            .eval(
                PUT_IF_ABSENT_SCRIPT,
                self.keys_for(cache, key),
                vec![value, lifespan_ms(lifespan)],
            )
            .await
            .map_err(from_redis_error)?;
        Ok(stored == 1)
    }

    async fn replace(
        &self,
        cache: &str,
        key: &str,
        value: String,
        lifespan: Option<Duration>,
    ) -> CacheResult<Option<u64>> {
        let version: i64 = self
            .client
            .eval(
                REPLACE_SCRIPT,
                self.keys_for(cache, key),
                vec![value, lifespan_ms(lifespan), String::new()],
            )
            .await
            .map_err(from_redis_error)?;
        Ok(version_from_reply(version))
    }

    async fn replace_if_version(
        &self,
        cache: &str,
        key: &str,
        value: String,
        expected: u64,
        lifespan: Option<Duration>,
    ) -> CacheResult<Option<u64>> {
        let version: i64 = self
            .client
            .eval(
                REPLACE_SCRIPT,
                self.keys_for(cache, key),
                vec![value, lifespan_ms(lifespan), expected.to_string()],
            )
            .await
            .map_err(from_redis_error)?;
        Ok(version_from_reply(version))
    }

    async fn remove(&self, cache: &str, key: &str) -> CacheResult<Option<VersionedValue>> {
        let taken: Vec<String> = self
            .client
            .eval(TAKE_SCRIPT, vec![self.entry_key(cache, key)], Vec::<String>::new())
            .await
            .map_err(from_redis_error)?;

        match taken.as_slice() {
            [value, version] => Ok(Some(VersionedValue {
                value: value.clone(),
                version: parse_version(version)?,
            })),
            _ => Ok(None),
        }
    }

    async fn remove_if_version(&self, cache: &str, key: &str, expected: u64) -> CacheResult<bool> {
        let removed: i64 = self
            .client
            .eval(
                REMOVE_IF_VERSION_SCRIPT,
                vec![self.entry_key(cache, key)],
                vec![expected.to_string()],
            )
            .await
            .map_err(from_redis_error)?;
        Ok(removed == 1)
    }

    async fn keys(&self, cache: &str) -> CacheResult<Vec<String>> {
        self.scan_keys(cache).await
    }

    async fn clear(&self, cache: &str) -> CacheResult<()> {
        let keys: Vec<String> = self
            .scan_keys(cache)
            .await?
            .iter()
            .map(|key| self.entry_key(cache, key))
            .collect();

        if keys.is_empty() {
            return Ok(());
        }

        let count = keys.len();
        self.client
            .del::<(), _>(keys)
            .await
            .map_err(from_redis_error)?;
        tracing::debug!("Cleared {} entries from cache {}", count, cache);
        Ok(())
    }
}
