//! Delayed sends for actor groups
//!
//! One timer thread per group, started on first use, holding deferred
//! deliveries in a deadline-ordered heap.

use crate::error::{Result, RuntimeError};
use crate::future::Deferred;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct Entry {
    deadline: Instant,
    seq: u64,
    deferred: Box<dyn Deferred>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; earliest deadline (then earliest seq) first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct SchedulerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    started: bool,
    shutdown: bool,
}

pub(crate) struct DelayedSends {
    name: String,
    state: Mutex<SchedulerState>,
    wake: Condvar,
}

impl DelayedSends {
    pub fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(SchedulerState::default()),
            wake: Condvar::new(),
        })
    }

    /// Deliver `deferred` once `delay` has elapsed.
    pub fn schedule(self: &Arc<Self>, delay: Duration, deferred: Box<dyn Deferred>) -> Result<()> {
        let mut state = self.state.lock();
        if state.shutdown {
            drop(state);
            deferred.cancel();
            return Err(RuntimeError::stopped(format!("scheduler '{}'", self.name)));
        }

        if !state.started {
            let me = Arc::clone(self);
            thread::Builder::new()
                .name(format!("{}-scheduler", self.name))
                .spawn(move || me.run())
                .map_err(|e| RuntimeError::spawn("delayed-send scheduler", e))?;
            state.started = true;
            debug!(group = %self.name, "Started delayed-send scheduler thread");
        }

        let deadline = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| RuntimeError::invalid_argument("delay overflows clock", Some("delay")))?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            deadline,
            seq,
            deferred,
        });
        self.wake.notify_one();
        Ok(())
    }

    /// Stop the timer thread and cancel everything still waiting.
    pub fn shutdown(&self) -> usize {
        let pending: Vec<Entry> = {
            let mut state = self.state.lock();
            state.shutdown = true;
            self.wake.notify_all();
            state.heap.drain().collect()
        };

        let count = pending.len();
        if count > 0 {
            warn!(group = %self.name, cancelled = count, "Cancelled pending delayed sends");
        }
        for entry in pending {
            entry.deferred.cancel();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.state.lock().heap.len()
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            let next_deadline = state.heap.peek().map(|entry| entry.deadline);
            match next_deadline {
                None => self.wake.wait(&mut state),
                Some(deadline) if deadline <= now => {
                    if let Some(entry) = state.heap.pop() {
                        drop(state);
                        entry.deferred.deliver();
                        state = self.state.lock();
                    }
                }
                Some(deadline) => {
                    self.wake.wait_until(&mut state, deadline);
                }
            }
        }
        debug!(group = %self.name, "Delayed-send scheduler thread exiting");
    }
}
