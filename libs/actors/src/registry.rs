//! Worker Registry
//!
//! Name and capability lookup for named workers. One lock guards both
//! indexes. Registries are plain objects owned by a
//! [`WorkerSystem`](crate::WorkerSystem), so separate systems (and tests)
//! never see each other's workers.

use crate::error::{Result, RuntimeError};
use crate::mailbox::WorkerState;
use crate::worker::Worker;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Type-erased view of a registered worker
pub trait ManagedWorker: Send + Sync + 'static {
    /// Identity shared by every handle to the same worker. Names can be
    /// reused once a worker is gone; ids are not.
    fn id(&self) -> Uuid;

    fn name(&self) -> &str;

    fn state(&self) -> WorkerState;

    /// Capability markers this worker provides
    fn services(&self) -> &[String];

    fn stop(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl fmt::Debug for dyn ManagedWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Check a worker name: non-empty, ASCII alphanumerics plus `_ - . ~`
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RuntimeError::invalid_argument(
            "worker name must not be empty",
            Some("name"),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '~')))
    {
        return Err(RuntimeError::invalid_argument(
            format!("invalid character {:?} in worker name '{}'", bad, name),
            Some("name"),
        ));
    }
    Ok(())
}

#[derive(Default)]
struct Indexes {
    by_name: HashMap<String, Arc<dyn ManagedWorker>>,
    /// capability -> providers in mount order
    by_service: HashMap<String, Vec<Arc<dyn ManagedWorker>>>,
}

/// Registry of named workers and the capabilities they provide
#[derive(Default)]
pub struct WorkerRegistry {
    indexes: Mutex<Indexes>,
    auto_names: AtomicU64,
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indexes = self.indexes.lock();
        f.debug_struct("WorkerRegistry")
            .field("workers", &indexes.by_name.len())
            .field("services", &indexes.by_service.len())
            .finish()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the worker's name; the first registration wins.
    pub fn register(&self, worker: Arc<dyn ManagedWorker>) -> Result<()> {
        let name = worker.name().to_string();
        validate_name(&name)?;

        let mut indexes = self.indexes.lock();
        if indexes.by_name.contains_key(&name) {
            warn!(worker = %name, "Duplicate worker name rejected");
            return Err(RuntimeError::duplicate_name(name));
        }
        debug!(worker = %name, "Registering worker");
        indexes.by_name.insert(name, worker);
        Ok(())
    }

    /// Remove a name. Returns false if it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.indexes.lock().by_name.remove(name).is_some();
        if removed {
            debug!(worker = %name, "Unregistered worker");
        }
        removed
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn ManagedWorker>> {
        self.indexes.lock().by_name.get(name).cloned()
    }

    /// Look up a worker and recover its typed handle. `None` when the name
    /// is unknown or the worker has different message/reply types.
    pub fn find_typed<M, R>(&self, name: &str) -> Option<Worker<M, R>>
    where
        M: Send + 'static,
        R: Send + 'static,
    {
        let worker = self.find(name)?;
        worker
            .into_any()
            .downcast::<Worker<M, R>>()
            .ok()
            .map(|worker| (*worker).clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indexes.lock().by_name.contains_key(name)
    }

    /// All registered workers, sorted by name
    pub fn list(&self) -> Vec<Arc<dyn ManagedWorker>> {
        let mut workers: Vec<_> = self.indexes.lock().by_name.values().cloned().collect();
        workers.sort_by(|a, b| a.name().cmp(b.name()));
        workers
    }

    pub fn len(&self) -> usize {
        self.indexes.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add the worker to the index of every capability it declares
    pub fn mount_services(&self, worker: Arc<dyn ManagedWorker>) {
        let mut indexes = self.indexes.lock();
        for service in worker.services() {
            debug!(worker = %worker.name(), service = %service, "Mounting service");
            indexes
                .by_service
                .entry(service.clone())
                .or_default()
                .push(Arc::clone(&worker));
        }
    }

    /// Remove the worker from every capability index it was mounted in.
    /// Another worker that has since taken the same name is left alone.
    pub fn unmount_services(&self, worker: &dyn ManagedWorker) {
        let id = worker.id();
        let mut indexes = self.indexes.lock();
        for service in worker.services() {
            let emptied = match indexes.by_service.get_mut(service) {
                Some(providers) => {
                    providers.retain(|p| p.id() != id);
                    providers.is_empty()
                }
                None => false,
            };
            if emptied {
                indexes.by_service.remove(service);
            }
        }
    }

    /// First mounted provider of a capability
    pub fn find_service(&self, service: &str) -> Option<Arc<dyn ManagedWorker>> {
        self.indexes
            .lock()
            .by_service
            .get(service)
            .and_then(|providers| providers.first().cloned())
    }

    /// Every mounted provider of a capability, in mount order
    pub fn find_all_services(&self, service: &str) -> Vec<Arc<dyn ManagedWorker>> {
        self.indexes
            .lock()
            .by_service
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// Next unused `worker.<n>` name
    pub fn auto_name(&self, prefix: &str) -> String {
        loop {
            let n = self.auto_names.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}.{}", prefix, n);
            if !self.contains(&name) {
                return name;
            }
        }
    }
}
