//! Worker System
//!
//! Owns the pieces named workers share: one [`WorkerRegistry`], one
//! [`ThreadReusePool`] and the runtime configuration. Also the factory for
//! [`ActorGroup`]s configured from the same source.
//!
//! # Lock Ordering
//!
//! The registry lock and the reuse-pool lock are never held while calling
//! into a worker. Inside a worker: run state before mailbox.

use crate::error::{Result, RuntimeError};
use crate::group::ActorGroup;
use crate::registry::{ManagedWorker, WorkerRegistry};
use crate::reuse::ThreadReusePool;
use crate::worker::{Worker, WorkerBuilder};
use actor_config::{RuntimeConfig, WorkerConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Registry, reuse pool and configuration for a set of named workers
#[derive(Debug)]
pub struct WorkerSystem {
    registry: Arc<WorkerRegistry>,
    threads: Arc<ThreadReusePool>,
    config: RuntimeConfig,
    system_id: String,
}

impl WorkerSystem {
    /// Create a system from validated configuration
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RuntimeError::invalid_argument(format!("{:#}", e), Some("config")))?;

        let system_id = Uuid::new_v4().to_string();
        info!(
            system_id = %system_id,
            max_queue_size = config.worker.max_queue_size,
            linger_ms = config.worker.linger_ms,
            "Creating worker system"
        );

        Ok(Self {
            registry: Arc::new(WorkerRegistry::new()),
            threads: ThreadReusePool::new(config.worker.linger()),
            config,
            system_id,
        })
    }

    /// Create a system with default configuration
    pub fn with_defaults() -> Self {
        let config = RuntimeConfig::default();
        Self {
            registry: Arc::new(WorkerRegistry::new()),
            threads: ThreadReusePool::new(config.worker.linger()),
            config,
            system_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn worker_config(&self) -> &WorkerConfig {
        &self.config.worker
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn reuse_pool(&self) -> &Arc<ThreadReusePool> {
        &self.threads
    }

    /// Start building a named worker in this system
    pub fn worker<M, R>(&self) -> WorkerBuilder<M, R>
    where
        M: Send + 'static,
        R: Send + 'static,
    {
        WorkerBuilder::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.threads),
            self.config.worker.clone(),
        )
    }

    /// Create an actor group using this system's group configuration
    pub fn actor_group(&self, name: impl Into<String>) -> Result<ActorGroup> {
        ActorGroup::new(name, self.config.group.clone())
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn ManagedWorker>> {
        self.registry.find(name)
    }

    pub fn find_typed<M, R>(&self, name: &str) -> Option<Worker<M, R>>
    where
        M: Send + 'static,
        R: Send + 'static,
    {
        self.registry.find_typed(name)
    }

    pub fn find_service(&self, service: &str) -> Option<Arc<dyn ManagedWorker>> {
        self.registry.find_service(service)
    }

    pub fn find_all_services(&self, service: &str) -> Vec<Arc<dyn ManagedWorker>> {
        self.registry.find_all_services(service)
    }

    /// Stop every registered worker and wait for the registry to empty
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let workers = self.registry.list();
        info!(system_id = %self.system_id, workers = workers.len(), "Shutting down worker system");

        for worker in &workers {
            worker.stop();
        }

        let deadline = Instant::now() + timeout;
        while !self.registry.is_empty() {
            if Instant::now() >= deadline {
                warn!(
                    system_id = %self.system_id,
                    remaining = self.registry.len(),
                    "Worker system shutdown timed out"
                );
                return Err(RuntimeError::timeout(
                    "WorkerSystem.shutdown",
                    timeout.as_millis() as u64,
                ));
            }
            // Workers registered while we were stopping the first batch
            for worker in self.registry.list() {
                worker.stop();
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}

impl Default for WorkerSystem {
    fn default() -> Self {
        Self::with_defaults()
    }
}
