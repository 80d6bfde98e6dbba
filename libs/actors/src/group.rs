//! Actor Group
//!
//! An elastic pool of OS threads shared by a set of actors. Submitted work
//! goes to an idle thread when one is parked, to a fresh thread while the
//! pool is below `max_threads`, and otherwise onto an overflow list that
//! threads drain before parking again.
//!
//! # Lock Ordering
//!
//! 1. actor mailbox
//! 2. group `state`
//! 3. pool thread `slot`
//!
//! Work is never submitted while an actor lock is held.

use crate::error::{Result, RuntimeError};
use crate::future::Deferred;
use crate::metrics::{GroupMetrics, GroupStats};
use crate::scheduler::DelayedSends;
use actor_config::GroupConfig;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A unit of work the pool can run or throw away.
pub(crate) trait Work: Send + Sync + 'static {
    /// Run on a pool thread.
    fn work(self: Arc<Self>);

    /// The pool was killed before this work started.
    fn kill(&self);
}

/// Group lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Accepting sends
    Running,
    /// Rejecting sends, still draining queued work
    Stopped,
    /// Every pool thread has exited
    Terminated,
}

struct PoolState {
    lifecycle: GroupState,
    threads: usize,
    /// Parked threads; the most recently parked is reused first so the
    /// oldest ones reach their idle timeout
    idle: Vec<Arc<PoolThread>>,
    overflow: VecDeque<Arc<dyn Work>>,
    next_thread_id: u64,
}

#[derive(Default)]
struct Slot {
    work: Option<Arc<dyn Work>>,
    /// Set by stop/kill so a parked thread re-checks the lifecycle
    signalled: bool,
}

struct PoolThread {
    id: u64,
    slot: Mutex<Slot>,
    wake: Condvar,
}

impl PoolThread {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
        })
    }

    fn hand_off(&self, work: Arc<dyn Work>) {
        let mut slot = self.slot.lock();
        slot.work = Some(work);
        self.wake.notify_one();
    }

    fn signal(&self) {
        let mut slot = self.slot.lock();
        slot.signalled = true;
        self.wake.notify_one();
    }
}

enum Ready {
    Work(Arc<dyn Work>),
    Idle,
    Exit,
}

pub(crate) struct GroupShared {
    name: String,
    config: GroupConfig,
    state: Mutex<PoolState>,
    terminated: Condvar,
    stopped: AtomicBool,
    killed: AtomicBool,
    metrics: GroupMetrics,
    pub(crate) delayed: Arc<DelayedSends>,
}

impl GroupShared {
    /// Hand `work` to a pool thread.
    ///
    /// Fails when the pool has terminated, or when no thread exists and the
    /// OS refuses to start one.
    pub fn submit(self: &Arc<Self>, work: Arc<dyn Work>) -> Result<()> {
        self.metrics.submissions.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        if self.killed.load(Ordering::Acquire) {
            drop(state);
            work.kill();
            return Ok(());
        }
        if state.lifecycle == GroupState::Terminated {
            // A send raced with the last thread exiting
            return Err(RuntimeError::stopped(format!("group '{}'", self.name)));
        }

        if let Some(thread) = state.idle.pop() {
            thread.hand_off(work);
            return Ok(());
        }

        if state.threads < self.config.max_threads {
            let id = state.next_thread_id;
            state.next_thread_id += 1;
            let thread = PoolThread::new(id);
            thread.slot.lock().work = Some(work);

            let shared = Arc::clone(self);
            let runner = Arc::clone(&thread);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, id))
                .spawn(move || shared.run_thread(runner));

            match spawned {
                Ok(_) => {
                    state.threads += 1;
                    self.metrics.threads_spawned.fetch_add(1, Ordering::Relaxed);
                    debug!(group = %self.name, thread_id = id, threads = state.threads, "Spawned pool thread");
                    return Ok(());
                }
                Err(e) => {
                    let work = thread.slot.lock().work.take();
                    if state.threads == 0 {
                        error!(group = %self.name, error = %e, "Failed to spawn first pool thread");
                        return Err(RuntimeError::spawn(
                            format!("pool thread for group '{}'", self.name),
                            e,
                        ));
                    }
                    warn!(group = %self.name, error = %e, "Pool thread spawn failed; queueing work");
                    if let Some(work) = work {
                        state.overflow.push_back(work);
                        self.metrics.overflow_submissions.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
            }
        }

        state.overflow.push_back(work);
        self.metrics.overflow_submissions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &GroupMetrics {
        &self.metrics
    }

    fn run_thread(&self, thread: Arc<PoolThread>) {
        let mut next = thread.slot.lock().work.take();

        loop {
            if let Some(work) = next.take() {
                self.run_work(work);
            }

            match self.ready(&thread) {
                Ready::Work(work) => {
                    next = Some(work);
                    continue;
                }
                Ready::Exit => return,
                Ready::Idle => {}
            }

            loop {
                let timed_out = {
                    let mut slot = thread.slot.lock();
                    let mut timed_out = false;
                    if slot.work.is_none() && !slot.signalled {
                        timed_out = thread
                            .wake
                            .wait_for(&mut slot, self.config.idle_timeout())
                            .timed_out();
                    }
                    slot.signalled = false;
                    if let Some(work) = slot.work.take() {
                        next = Some(work);
                        break;
                    }
                    timed_out
                };

                match self.idle_expired(&thread, timed_out) {
                    Ready::Work(work) => {
                        next = Some(work);
                        break;
                    }
                    Ready::Exit => return,
                    Ready::Idle => {}
                }
            }
        }
    }

    fn run_work(&self, work: Arc<dyn Work>) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work.work())) {
            error!(
                group = %self.name,
                panic = %crate::error::panic_message(payload.as_ref()),
                "Pool work panicked"
            );
        }
    }

    /// Called between units of work: pick up overflow, park, or exit.
    fn ready(&self, thread: &Arc<PoolThread>) -> Ready {
        let mut state = self.state.lock();
        if let Some(work) = state.overflow.pop_front() {
            return Ready::Work(work);
        }
        if state.lifecycle != GroupState::Running {
            self.retire(&mut state, thread.id);
            return Ready::Exit;
        }
        state.idle.push(Arc::clone(thread));
        Ready::Idle
    }

    /// Called when a parked thread wakes without work in its slot.
    fn idle_expired(&self, thread: &Arc<PoolThread>, timed_out: bool) -> Ready {
        let mut state = self.state.lock();

        // submit() may have popped us and filled the slot after the wait ended
        if let Some(work) = thread.slot.lock().work.take() {
            return Ready::Work(work);
        }

        if let Some(work) = state.overflow.pop_front() {
            state.idle.retain(|t| !Arc::ptr_eq(t, thread));
            return Ready::Work(work);
        }

        if state.lifecycle == GroupState::Running
            && (!timed_out || state.threads <= self.config.min_threads)
        {
            return Ready::Idle;
        }

        state.idle.retain(|t| !Arc::ptr_eq(t, thread));
        self.retire(&mut state, thread.id);
        Ready::Exit
    }

    fn retire(&self, state: &mut PoolState, thread_id: u64) {
        state.threads -= 1;
        self.metrics.threads_retired.fetch_add(1, Ordering::Relaxed);
        debug!(group = %self.name, thread_id, threads = state.threads, "Pool thread exiting");

        if state.threads == 0 && state.lifecycle != GroupState::Running {
            state.lifecycle = GroupState::Terminated;
            self.terminated.notify_all();
        }
    }

    /// Move to `Stopped` and wake parked threads so they can exit.
    fn shut_down(&self) -> VecDeque<Arc<dyn Work>> {
        let mut state = self.state.lock();
        if state.lifecycle == GroupState::Running {
            state.lifecycle = GroupState::Stopped;
        }

        for thread in &state.idle {
            thread.signal();
        }

        if state.threads == 0 && state.lifecycle == GroupState::Stopped {
            state.lifecycle = GroupState::Terminated;
            self.terminated.notify_all();
        }

        if self.killed.load(Ordering::Acquire) {
            std::mem::take(&mut state.overflow)
        } else {
            VecDeque::new()
        }
    }
}

/// Pool scheduler shared by a set of [`Actor`](crate::Actor)s.
///
/// Cheap to clone; all clones refer to the same pool.
#[derive(Clone)]
pub struct ActorGroup {
    pub(crate) shared: Arc<GroupShared>,
}

impl fmt::Debug for ActorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorGroup")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ActorGroup {
    /// Create a group; no threads start until the first message.
    pub fn new(name: impl Into<String>, config: GroupConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RuntimeError::invalid_argument(format!("{:#}", e), Some("config")))?;

        Ok(Self::build(name.into(), config))
    }

    /// Create a group with the default [`GroupConfig`]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::build(name.into(), GroupConfig::default())
    }

    fn build(name: String, config: GroupConfig) -> Self {
        info!(
            group = %name,
            min_threads = config.min_threads,
            max_threads = config.max_threads,
            idle_timeout_ms = config.idle_timeout_ms,
            "Creating actor group"
        );

        Self {
            shared: Arc::new(GroupShared {
                delayed: DelayedSends::new(name.clone()),
                name,
                config,
                state: Mutex::new(PoolState {
                    lifecycle: GroupState::Running,
                    threads: 0,
                    idle: Vec::new(),
                    overflow: VecDeque::new(),
                    next_thread_id: 0,
                }),
                terminated: Condvar::new(),
                stopped: AtomicBool::new(false),
                killed: AtomicBool::new(false),
                metrics: GroupMetrics::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &GroupConfig {
        &self.shared.config
    }

    pub fn state(&self) -> GroupState {
        self.shared.state.lock().lifecycle
    }

    /// True once [`stop`](Self::stop) or [`kill`](Self::kill) has been called
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// True once stopped and every pool thread has exited
    pub fn is_done(&self) -> bool {
        self.state() == GroupState::Terminated
    }

    /// Stop accepting sends. Messages already queued are still processed;
    /// pending delayed sends are cancelled.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(group = %self.shared.name, "Stopping actor group");
        self.shared.shut_down();
        self.shared.delayed.shutdown();
    }

    /// Stop and cancel every message not yet started. Messages being
    /// processed run to completion.
    pub fn kill(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        if self.shared.killed.swap(true, Ordering::AcqRel) {
            return;
        }

        let overflow = self.shared.shut_down();
        let delayed = self.shared.delayed.shutdown();
        warn!(
            group = %self.shared.name,
            queued_actors = overflow.len(),
            delayed_sends = delayed,
            "Killing actor group"
        );
        for work in overflow {
            work.kill();
        }
    }

    /// Wait for every pool thread to exit after a stop or kill.
    ///
    /// Returns [`RuntimeError::InvalidState`] if the group is still running
    /// and [`RuntimeError::Timeout`] if the wait expires.
    pub fn join(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.shared.state.lock();

        if state.lifecycle == GroupState::Running {
            return Err(RuntimeError::invalid_state(format!(
                "group '{}' must be stopped before join",
                self.shared.name
            )));
        }

        while state.lifecycle != GroupState::Terminated {
            match deadline {
                None => self.shared.terminated.wait(&mut state),
                Some(deadline) => {
                    let timed_out = self
                        .shared
                        .terminated
                        .wait_until(&mut state, deadline)
                        .timed_out();
                    if timed_out && state.lifecycle != GroupState::Terminated {
                        return Err(RuntimeError::timeout(
                            "ActorGroup.join",
                            timeout.map_or(0, |t| t.as_millis() as u64),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Live pool threads
    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().threads
    }

    /// Pool threads currently parked
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Delayed sends still waiting for their deadline
    pub fn pending_delayed(&self) -> usize {
        self.shared.delayed.pending()
    }

    pub fn metrics(&self) -> &GroupMetrics {
        &self.shared.metrics
    }

    pub fn stats(&self) -> GroupStats {
        self.shared.metrics.stats()
    }

    /// Deliver `deferred` after `delay` on this group's timer thread.
    pub(crate) fn schedule(&self, delay: Duration, deferred: Box<dyn Deferred>) -> Result<()> {
        self.shared.delayed.schedule(delay, deferred)
    }
}
