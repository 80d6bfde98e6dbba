//! Result Cell
//!
//! A [`Future`] tracks the lifecycle of one message: pending until the
//! dispatching thread completes or fails it, or until a holder cancels it.
//! Readers block on the cell's monitor with an optional timeout.
//!
//! Values that are not [`Snapshot::is_immutable`] are delivered to exactly
//! one reader: the first successful [`Future::get`] takes the value and
//! later reads observe `None`.

use crate::error::{Result, RuntimeError};
use crate::snapshot::Snapshot;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work held back until some event fires: a future completing, or a delay
/// elapsing in the group scheduler.
pub(crate) trait Deferred: Send {
    /// The event fired; hand the held message on.
    fn deliver(self: Box<Self>);

    /// The event will never fire; release the held message's result cell.
    fn cancel(self: Box<Self>);
}

/// Observable lifecycle state of a [`Future`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Cancelled,
    Completed,
    Failed,
}

impl FutureState {
    pub fn is_terminal(self) -> bool {
        self != FutureState::Pending
    }
}

enum Slot<T> {
    Pending,
    Cancelled,
    /// `None` once a mutable value has been taken by its reader
    Completed(Option<T>),
    Failed(RuntimeError),
}

struct Inner<T> {
    slot: Slot<T>,
    when_done: Vec<Box<dyn Deferred>>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    done: Condvar,
}

/// One-shot container for a message's eventual outcome
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Send + 'static> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Future<T> {
    /// Current state without blocking
    pub fn state(&self) -> FutureState {
        match self.shared.inner.lock().slot {
            Slot::Pending => FutureState::Pending,
            Slot::Cancelled => FutureState::Cancelled,
            Slot::Completed(_) => FutureState::Completed,
            Slot::Failed(_) => FutureState::Failed,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == FutureState::Cancelled
    }

    /// Whether both handles refer to the same cell
    pub fn ptr_eq(&self, other: &Future<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Send + 'static> Future<T> {
    /// Create a pending cell
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    slot: Slot::Pending,
                    when_done: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Complete with a value. Returns `false` (and drops `value`) if the
    /// cell was already terminal, e.g. cancelled while the handler ran.
    pub fn complete(&self, value: T) -> bool {
        self.finish(Slot::Completed(Some(value)))
    }

    /// Complete with an error. No-op on a terminal cell.
    pub fn fail(&self, error: RuntimeError) -> bool {
        self.finish(Slot::Failed(error))
    }

    /// Cancel if still pending. A message already being processed runs to
    /// completion regardless; its result is then discarded.
    pub fn cancel(&self) -> bool {
        self.finish(Slot::Cancelled)
    }

    fn finish(&self, outcome: Slot<T>) -> bool {
        let when_done = {
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.slot, Slot::Pending) {
                return false;
            }
            inner.slot = outcome;
            self.shared.done.notify_all();
            std::mem::take(&mut inner.when_done)
        };

        for deferred in when_done {
            deferred.deliver();
        }
        true
    }

    /// Run `deferred` once this cell is terminal; immediately if it already is.
    pub(crate) fn when_done(&self, deferred: Box<dyn Deferred>) {
        let mut inner = self.shared.inner.lock();
        if matches!(inner.slot, Slot::Pending) {
            inner.when_done.push(deferred);
            return;
        }
        drop(inner);
        deferred.deliver();
    }
}

impl<T: Send + 'static> Future<T> {
    /// Block until terminal and move the value out, whether or not it is
    /// shareable. Used where the runtime knows there is a single reader.
    pub(crate) fn take(&self, timeout: Option<Duration>) -> Result<Option<T>> {
        let mut inner = self.wait_terminal(timeout)?;
        match &mut inner.slot {
            Slot::Completed(value) => Ok(value.take()),
            slot => Err(terminal_error(slot)),
        }
    }

    fn wait_terminal(&self, timeout: Option<Duration>) -> Result<MutexGuard<'_, Inner<T>>> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut inner = self.shared.inner.lock();

        while matches!(inner.slot, Slot::Pending) {
            match deadline {
                None => self.shared.done.wait(&mut inner),
                Some(deadline) => {
                    let timed_out = self.shared.done.wait_until(&mut inner, deadline).timed_out();
                    if timed_out && matches!(inner.slot, Slot::Pending) {
                        let timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
                        return Err(RuntimeError::timeout("Future.get", timeout_ms));
                    }
                }
            }
        }
        Ok(inner)
    }
}

fn terminal_error<T>(slot: &Slot<T>) -> RuntimeError {
    match slot {
        Slot::Failed(error) => error.clone(),
        Slot::Pending => RuntimeError::invalid_state("future is still pending"),
        _ => RuntimeError::Cancelled,
    }
}

impl<T: Snapshot> Future<T> {
    /// Block until terminal, or until `timeout` elapses.
    ///
    /// Returns the value (`None` if a mutable value was already taken),
    /// [`RuntimeError::Cancelled`], the handler's error, or
    /// [`RuntimeError::Timeout`]. Timing out does not cancel the message.
    pub fn get(&self, timeout: Option<Duration>) -> Result<Option<T>> {
        let mut inner = self.wait_terminal(timeout)?;
        match &mut inner.slot {
            Slot::Completed(value) => {
                if value.as_ref().map_or(false, Snapshot::is_immutable) {
                    Ok(value.as_ref().map(Snapshot::snapshot))
                } else {
                    Ok(value.take())
                }
            }
            slot => Err(terminal_error(slot)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct CountDelivery(Arc<AtomicUsize>, Arc<AtomicUsize>);

    impl Deferred for CountDelivery {
        fn deliver(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(self: Box<Self>) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_mutable_value_is_read_once() {
        let future = Future::new();
        assert!(future.complete(String::from("payload")));

        assert_eq!(future.get(None).unwrap(), Some(String::from("payload")));
        assert_eq!(future.get(None).unwrap(), None);
        assert_eq!(future.state(), FutureState::Completed);
    }

    #[test]
    fn test_immutable_value_is_read_repeatedly() {
        let future = Future::new();
        future.complete(Arc::new("shared"));

        let first = future.get(None).unwrap().unwrap();
        let second = future.get(None).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let number = Future::new();
        number.complete(99_u64);
        assert_eq!(number.get(None).unwrap(), Some(99));
        assert_eq!(number.get(None).unwrap(), Some(99));
    }

    #[test]
    fn test_shared_handle_to_mutable_value_is_read_once() {
        let future = Future::new();
        future.complete(Arc::new(vec![1_u8]));

        let first = future.get(None).unwrap().unwrap();
        assert_eq!(*first, vec![1]);
        assert_eq!(future.get(None).unwrap(), None);
    }

    #[test]
    fn test_terminal_state_never_changes() {
        let future: Future<u32> = Future::new();
        assert!(future.cancel());
        assert!(!future.complete(1));
        assert!(!future.fail(RuntimeError::handler("late")));
        assert!(!future.cancel());

        assert!(future.is_cancelled());
        assert!(matches!(future.get(None), Err(RuntimeError::Cancelled)));
    }

    #[test]
    fn test_failure_is_reraised_to_every_reader() {
        let future: Future<u32> = Future::new();
        future.fail(RuntimeError::handler("bad quote"));

        for _ in 0..2 {
            match future.get(None) {
                Err(RuntimeError::Handler { message, .. }) => assert_eq!(message, "bad quote"),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_get_times_out_without_cancelling() {
        let future: Future<u32> = Future::new();
        let start = Instant::now();
        let result = future.get(Some(Duration::from_millis(30)));

        assert!(matches!(result, Err(RuntimeError::Timeout { timeout_ms: 30, .. })));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(future.state(), FutureState::Pending);

        future.complete(5);
        assert_eq!(future.get(Some(Duration::from_millis(30))).unwrap(), Some(5));
    }

    #[test]
    fn test_take_moves_any_value() {
        struct Opaque(u8);
        let future = Future::new();
        future.complete(Opaque(4));
        assert_eq!(future.take(None).unwrap().map(|o| o.0), Some(4));
        assert!(future.take(None).unwrap().is_none());
    }

    #[test]
    fn test_blocked_reader_is_woken() {
        let future: Future<u32> = Future::new();
        let reader = {
            let future = future.clone();
            thread::spawn(move || future.get(None))
        };

        thread::sleep(Duration::from_millis(20));
        future.complete(11);
        assert_eq!(reader.join().unwrap().unwrap(), Some(11));
    }

    #[test]
    fn test_when_done_runs_once_on_any_terminal_state() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));

        let future: Future<u32> = Future::new();
        future.when_done(Box::new(CountDelivery(delivered.clone(), cancelled.clone())));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        future.cancel();
        future.complete(3);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        // Already terminal: delivered immediately
        future.when_done(Box::new(CountDelivery(delivered.clone(), cancelled.clone())));
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }
}
