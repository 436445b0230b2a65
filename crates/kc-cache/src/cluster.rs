//! Cluster coordination.
//!
//! Nodes sharing a cache backend agree on who runs a periodic task by
//! racing to create a lock entry in the `work` cache. The entry lives for
//! the task interval, so a task runs at most once per interval across the
//! cluster. A node crashing mid-task leaves that interval unexecuted; missed
//! intervals are not backfilled.
//!
//! The periodic runner holds its lock for nine tenths of the interval, so
//! the lock taken on one tick is gone by the next one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kc_spi::{
    FactoryConfig, KeycloakSession, KeycloakSessionFactory, Provider, ProviderFactory,
    ProviderMetadata, Spi, SpiError, TransactionError,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::{CacheBackend, caches};
use crate::error::{CacheError, CacheResult};

/// Name of the cluster SPI.
pub const CLUSTER_SPI: &str = "cluster";

/// Prefix of task lock keys in the `work` cache.
pub const TASK_KEY_PREFIX: &str = "task::";

/// The cluster SPI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterSpi;

impl Spi for ClusterSpi {
    fn name(&self) -> &'static str {
        CLUSTER_SPI
    }

    fn is_internal(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockEntry {
    node: String,
    acquired_at: DateTime<Utc>,
}

/// Outcome of [`ClusterCoordinator::execute_if_not_executed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult<T> {
    executed: bool,
    result: Option<T>,
}

impl<T> ExecutionResult<T> {
    /// The task ran on this node and produced `result`.
    pub const fn executed(result: T) -> Self {
        Self {
            executed: true,
            result: Some(result),
        }
    }

    /// Another node holds the lock for this interval.
    pub const fn not_executed() -> Self {
        Self {
            executed: false,
            result: None,
        }
    }

    /// Returns whether the task ran on this node.
    pub const fn is_executed(&self) -> bool {
        self.executed
    }

    /// Returns the task's result if it ran.
    pub const fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    /// Consumes the outcome and returns the task's result if it ran.
    pub fn into_result(self) -> Option<T> {
        self.result
    }
}

/// Per-session cluster coordination.
#[derive(Debug, Clone)]
pub struct ClusterCoordinator {
    backend: Arc<dyn CacheBackend>,
    node_name: String,
}

impl Provider for ClusterCoordinator {}

impl ClusterCoordinator {
    /// Creates a coordinator for the node called `node_name`.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, node_name: impl Into<String>) -> Self {
        Self {
            backend,
            node_name: node_name.into(),
        }
    }

    /// Returns this node's name.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Runs `task` unless some node already ran `task_key` within the last
    /// `interval_seconds`.
    ///
    /// The lock is kept for the whole interval, also when the task fails.
    ///
    /// ## Errors
    ///
    /// Returns the task's error, or a backend error converted into `E`.
    pub async fn execute_if_not_executed<T, E, F, Fut>(
        &self,
        task_key: &str,
        interval_seconds: u64,
        task: F,
    ) -> Result<ExecutionResult<T>, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: From<CacheError>,
    {
        self.execute_if_not_locked(task_key, Duration::from_secs(interval_seconds), task)
            .await
    }

    /// Runs `task` unless the lock of `task_key` is held, holding the lock
    /// for `lock_lifespan`.
    ///
    /// ## Errors
    ///
    /// Returns the task's error, or a backend error converted into `E`.
    pub async fn execute_if_not_locked<T, E, F, Fut>(
        &self,
        task_key: &str,
        lock_lifespan: Duration,
        task: F,
    ) -> Result<ExecutionResult<T>, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: From<CacheError>,
    {
        let cache_key = format!("{TASK_KEY_PREFIX}{task_key}");
        let lock = LockEntry {
            node: self.node_name.clone(),
            acquired_at: Utc::now(),
        };
        let value = serde_json::to_string(&lock).map_err(CacheError::from)?;

        let acquired = self
            .backend
            .put_if_absent(caches::WORK, &cache_key, value, Some(lock_lifespan))
            .await?;
        if !acquired {
            return Ok(ExecutionResult::not_executed());
        }

        let result = task().await?;
        Ok(ExecutionResult::executed(result))
    }

    /// Returns the node currently holding the lock of `task_key`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails or the entry cannot be decoded.
    pub async fn lock_holder(&self, task_key: &str) -> CacheResult<Option<String>> {
        let entry = self
            .backend
            .get(caches::WORK, &format!("{TASK_KEY_PREFIX}{task_key}"))
            .await?;
        entry
            .map(|v| serde_json::from_str::<LockEntry>(&v.value).map(|l| l.node))
            .transpose()
            .map_err(CacheError::from)
    }
}

/// Factory of [`ClusterCoordinator`]s.
///
/// Configuration: `nodeName` overrides the node name given at construction.
#[derive(Debug)]
pub struct ClusterProviderFactory {
    backend: Arc<dyn CacheBackend>,
    node_name: RwLock<String>,
}

impl ClusterProviderFactory {
    /// Provider ID.
    pub const ID: &'static str = "default";

    /// Creates a factory for the node called `node_name`.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, node_name: impl Into<String>) -> Self {
        Self {
            backend,
            node_name: RwLock::new(node_name.into()),
        }
    }
}

impl ProviderFactory for ClusterProviderFactory {
    type Provider = ClusterCoordinator;

    fn id(&self) -> &'static str {
        Self::ID
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: Self::ID,
            name: "Cluster",
            description: "At-most-once task execution across cluster nodes",
            priority: 0,
        }
    }

    fn init(&self, config: &dyn FactoryConfig) -> Result<(), SpiError> {
        if let Some(name) = config.get("nodeName") {
            *self.node_name.write() = name.to_string();
        }
        Ok(())
    }

    fn create(&self, _session: &KeycloakSession) -> Result<ClusterCoordinator, SpiError> {
        Ok(ClusterCoordinator::new(
            Arc::clone(&self.backend),
            self.node_name.read().clone(),
        ))
    }
}

/// Errors raised by scheduled tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Cache failure.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The task's unit of work failed to complete.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// A required provider is missing.
    #[error("provider error: {0}")]
    Spi(#[from] SpiError),

    /// The task itself failed.
    #[error("task failed: {0}")]
    Failed(String),
}

/// A periodic maintenance task.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    /// Returns the cluster-wide name of the task.
    fn task_name(&self) -> &str;

    /// Runs the task inside `session`.
    ///
    /// The runner commits the session's unit of work afterwards.
    async fn run(&self, session: &KeycloakSession) -> Result<(), TaskError>;
}

/// Runs a [`ScheduledTask`] periodically, at most once per interval across
/// the cluster.
pub struct ClusterAwareScheduledTaskRunner {
    factory: Arc<KeycloakSessionFactory>,
    task: Arc<dyn ScheduledTask>,
    interval: Duration,
}

impl std::fmt::Debug for ClusterAwareScheduledTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterAwareScheduledTaskRunner")
            .field("task", &self.task.task_name())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ClusterAwareScheduledTaskRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        factory: Arc<KeycloakSessionFactory>,
        task: Arc<dyn ScheduledTask>,
        interval: Duration,
    ) -> Self {
        Self {
            factory,
            task,
            interval,
        }
    }

    /// Returns how long a tick holds the cluster lock.
    #[must_use]
    pub fn lock_lifespan(&self) -> Duration {
        self.interval - self.interval / 10
    }

    /// Runs one tick: executes the task in a fresh session if no other
    /// node ran it in the current interval. Returns whether it ran here.
    ///
    /// ## Errors
    ///
    /// Returns the task's error or a failure to commit its unit of work.
    pub async fn run_once(&self) -> Result<bool, TaskError> {
        let session = self.factory.create();
        let coordinator = session.provider::<ClusterProviderFactory>(CLUSTER_SPI)?;
        let name = self.task.task_name();

        let outcome = coordinator
            .execute_if_not_locked(name, self.lock_lifespan(), || self.task.run(&session))
            .await;

        match outcome {
            Ok(result) => {
                session.transaction_manager().commit().await?;
                if result.is_executed() {
                    tracing::debug!("Executed scheduled task {}", name);
                } else {
                    tracing::debug!(
                        "Skipped execution of task {} as other cluster node is executing it",
                        name
                    );
                }
                Ok(result.is_executed())
            }
            Err(error) => {
                if let Err(rollback) = session.transaction_manager().rollback().await {
                    tracing::warn!("Rollback after failed task {} failed: {}", name, rollback);
                }
                Err(error)
            }
        }
    }

    /// Spawns the periodic loop. Abort the handle to stop it.
    #[must_use]
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(error) = self.run_once().await {
                    tracing::error!(
                        "Failed to run scheduled task {}: {}",
                        self.task.task_name(),
                        error
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kc_spi::{ProviderConfig, SpiRegistry};

    use super::*;
    use crate::memory::InMemoryCacheBackend;

    #[tokio::test]
    async fn second_node_skips_within_interval() {
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let node1 = ClusterCoordinator::new(Arc::clone(&backend), "node-1");
        let node2 = ClusterCoordinator::new(Arc::clone(&backend), "node-2");

        let first = node1
            .execute_if_not_executed("cleanup", 60, || async { Ok::<_, CacheError>(1) })
            .await
            .unwrap();
        let second = node2
            .execute_if_not_executed("cleanup", 60, || async { Ok::<_, CacheError>(2) })
            .await
            .unwrap();

        assert_eq!(first, ExecutionResult::executed(1));
        assert!(!second.is_executed());
        assert_eq!(
            node2.lock_holder("cleanup").await.unwrap().as_deref(),
            Some("node-1")
        );
    }

    #[tokio::test]
    async fn failing_task_keeps_the_interval() {
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let node = ClusterCoordinator::new(backend, "node-1");

        let failed = node
            .execute_if_not_executed("cleanup", 60, || async {
                Err::<(), _>(TaskError::Failed("boom".to_string()))
            })
            .await;
        let retried = node
            .execute_if_not_executed("cleanup", 60, || async { Ok::<_, TaskError>(()) })
            .await
            .unwrap();

        assert!(matches!(failed, Err(TaskError::Failed(_))));
        assert!(!retried.is_executed());
    }

    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledTask for Counting {
        fn task_name(&self) -> &str {
            "counting"
        }

        async fn run(&self, _session: &KeycloakSession) -> Result<(), TaskError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runner_executes_through_registered_coordinator() {
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let registry = SpiRegistry::new();
        registry.register(&ClusterSpi, ClusterProviderFactory::new(backend, "node-1"));
        let factory =
            KeycloakSessionFactory::initialize(Arc::new(registry), &ProviderConfig::new()).unwrap();

        let task = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let runner = ClusterAwareScheduledTaskRunner::new(
            factory,
            Arc::clone(&task) as Arc<dyn ScheduledTask>,
            Duration::from_secs(60),
        );

        assert!(runner.run_once().await.unwrap());
        assert!(!runner.run_once().await.unwrap());
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_node_runs_on_every_tick() {
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let registry = SpiRegistry::new();
        registry.register(&ClusterSpi, ClusterProviderFactory::new(backend, "node-1"));
        let factory =
            KeycloakSessionFactory::initialize(Arc::new(registry), &ProviderConfig::new()).unwrap();

        let task = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let runner = Arc::new(ClusterAwareScheduledTaskRunner::new(
            factory,
            Arc::clone(&task) as Arc<dyn ScheduledTask>,
            Duration::from_millis(200),
        ));
        assert_eq!(runner.lock_lifespan(), Duration::from_millis(180));

        // ticks at 0, 200, 400, 600, 800 and 1000 ms
        let handle = Arc::clone(&runner).start();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        handle.abort();

        assert!(task.runs.load(Ordering::SeqCst) >= 5);
    }
}
