//! Thread Reuse Pool
//!
//! Backing threads for named workers. When a worker's body ends its thread
//! lingers on the idle list for a grace period; a worker started in that
//! window is attached to it instead of spawning a new OS thread. Threads
//! nobody claims evict themselves and exit.
//!
//! Lock order: pool `idle` before thread `slot`.

use crate::error::{from_panic, Result, RuntimeError};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// Panic payload for aborting a worker body from tests without the
/// backing thread reporting it as a failure.
///
/// ```no_run
/// std::panic::panic_any(actor_runtime::TestAbort);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestAbort;

/// Something a backing thread can run.
pub trait Attached: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Run the body on the backing thread. May panic.
    fn run_attached(&self);

    /// The body has ended. `panic` is set if it panicked (other than with
    /// [`TestAbort`]).
    fn detach(&self, panic: Option<RuntimeError>);
}

#[derive(Default)]
struct Slot {
    attached: Option<Arc<dyn Attached>>,
    /// Claimed by `acquire`; an attach is on its way
    allocated: bool,
    started: bool,
    exited: bool,
}

/// One OS thread that runs workers one after another
pub struct BackingThread {
    id: u64,
    slot: Mutex<Slot>,
    wake: Condvar,
}

impl fmt::Debug for BackingThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("BackingThread")
            .field("id", &self.id)
            .field("allocated", &slot.allocated)
            .field("started", &slot.started)
            .finish()
    }
}

impl BackingThread {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hand `worker` to this thread, spawning the OS thread on first use.
    pub fn attach(
        self: &Arc<Self>,
        pool: &Arc<ThreadReusePool>,
        worker: Arc<dyn Attached>,
    ) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.exited {
            return Err(RuntimeError::invalid_state(format!(
                "backing thread {} has exited",
                self.id
            )));
        }

        let name = worker.name().to_string();
        slot.attached = Some(worker);

        if slot.started {
            self.wake.notify_one();
            debug!(thread_id = self.id, worker = %name, "Reattached backing thread");
            return Ok(());
        }

        let pool = Arc::clone(pool);
        let thread = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("worker-thread-{}", self.id))
            .spawn(move || pool.run(thread));

        match spawned {
            Ok(_) => {
                slot.started = true;
                debug!(thread_id = self.id, worker = %name, "Spawned backing thread");
                Ok(())
            }
            Err(e) => {
                slot.attached = None;
                slot.exited = true;
                error!(thread_id = self.id, worker = %name, error = %e, "Failed to spawn backing thread");
                Err(RuntimeError::spawn(format!("backing thread for worker '{}'", name), e))
            }
        }
    }
}

/// Pool of lingering backing threads
pub struct ThreadReusePool {
    grace: Duration,
    idle: Mutex<Vec<Arc<BackingThread>>>,
    next_id: AtomicU64,
    created: AtomicU64,
    reused: AtomicU64,
}

impl fmt::Debug for ThreadReusePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadReusePool")
            .field("grace", &self.grace)
            .field("idle", &self.idle_count())
            .field("created", &self.created())
            .finish()
    }
}

impl ThreadReusePool {
    /// `grace` is how long an idle thread waits for a new worker.
    pub fn new(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            grace,
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        })
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Claim the most recently idled thread, or a fresh one.
    pub fn acquire(&self) -> Arc<BackingThread> {
        let mut idle = self.idle.lock();
        if let Some(thread) = idle.pop() {
            thread.slot.lock().allocated = true;
            self.reused.fetch_add(1, Ordering::Relaxed);
            return thread;
        }
        drop(idle);

        self.created.fetch_add(1, Ordering::Relaxed);
        Arc::new(BackingThread {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            slot: Mutex::new(Slot {
                allocated: true,
                ..Slot::default()
            }),
            wake: Condvar::new(),
        })
    }

    /// Acquire a thread and run `worker` on it
    pub fn start(self: &Arc<Self>, worker: Arc<dyn Attached>) -> Result<()> {
        let thread = self.acquire();
        thread.attach(self, worker)
    }

    /// Put a finished thread on the idle list
    pub fn linger(&self, thread: &Arc<BackingThread>) {
        let mut idle = self.idle.lock();
        thread.slot.lock().allocated = false;
        idle.push(Arc::clone(thread));
        debug!(thread_id = thread.id, idle = idle.len(), "Backing thread lingering");
    }

    /// Remove an unclaimed thread from the idle list.
    ///
    /// Returns false if `acquire` claimed it first; the thread must then
    /// wait for its attach.
    pub fn evict(&self, thread: &Arc<BackingThread>) -> bool {
        let mut idle = self.idle.lock();
        let mut slot = thread.slot.lock();
        if slot.allocated || slot.attached.is_some() {
            return false;
        }
        idle.retain(|t| !Arc::ptr_eq(t, thread));
        slot.exited = true;
        debug!(thread_id = thread.id, "Evicting backing thread");
        true
    }

    /// Threads currently lingering
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Backing threads created over the pool's lifetime
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Acquisitions served from the idle list
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    fn run(&self, thread: Arc<BackingThread>) {
        loop {
            let Some(worker) = self.wait_for_attach(&thread) else {
                if self.evict(&thread) {
                    return;
                }
                continue;
            };

            let panic = match panic::catch_unwind(AssertUnwindSafe(|| worker.run_attached())) {
                Ok(()) => None,
                Err(payload) => self.panic_outcome(worker.name(), payload),
            };
            worker.detach(panic);
            drop(worker);

            self.linger(&thread);
        }
    }

    /// Wait for a worker. Claimed threads wait indefinitely; lingering
    /// ones give up after the grace period.
    fn wait_for_attach(&self, thread: &BackingThread) -> Option<Arc<dyn Attached>> {
        let mut slot = thread.slot.lock();
        loop {
            if let Some(worker) = slot.attached.take() {
                return Some(worker);
            }
            if slot.allocated {
                thread.wake.wait(&mut slot);
                continue;
            }
            let timed_out = thread.wake.wait_for(&mut slot, self.grace).timed_out();
            if timed_out && slot.attached.is_none() && !slot.allocated {
                return None;
            }
        }
    }

    fn panic_outcome(&self, worker: &str, payload: Box<dyn Any + Send>) -> Option<RuntimeError> {
        if payload.is::<TestAbort>() {
            debug!(worker = %worker, "Worker body aborted by test");
            return None;
        }
        let err = from_panic(payload);
        error!(worker = %worker, error = %err, "Worker body panicked");
        Some(err)
    }
}
