//! Mailbox Actor
//!
//! An [`Actor`] owns a queue and a handler. Sends append to the queue and
//! return a [`Future`]; the first send into an idle actor submits it to its
//! [`ActorGroup`], and a pool thread then drains the whole backlog in order.
//! Drains of the same actor never overlap, so the handler and its
//! [`Context`] are only ever touched by one thread at a time.

use crate::error::{from_panic, wrap_error, Result, RuntimeError};
use crate::future::{Deferred, Future};
use crate::group::{ActorGroup, GroupShared, Work};
use crate::queue::{CoalescingQueue, Envelope, FifoQueue, MailboxQueue};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Unique actor identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId {
    id: Uuid,
}

impl ActorId {
    /// Create new actor ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Create from UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self { id }
    }

    /// Get UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.id.simple())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-actor state visible to the handler.
///
/// Values live as long as the actor and are only reachable from its own
/// handler invocations.
pub struct Context {
    actor_id: ActorId,
    locals: HashMap<String, Box<dyn Any + Send>>,
}

impl Context {
    fn new(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            locals: HashMap::new(),
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Look up a local; `None` if missing or stored with another type
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.locals.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.locals.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Store a local, returning true if it replaced an existing value
    pub fn insert<T: Any + Send>(&mut self, key: impl Into<String>, value: T) -> bool {
        self.locals.insert(key.into(), Box::new(value)).is_some()
    }

    /// Remove a local. A value of another type is removed but not returned.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.locals
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locals.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.locals.keys().collect();
        keys.sort();
        f.debug_struct("Context")
            .field("actor_id", &self.actor_id)
            .field("locals", &keys)
            .finish()
    }
}

type Handler<M, R> = Box<dyn Fn(&mut Context, M) -> anyhow::Result<R> + Send + Sync>;

struct MailboxState<M, R> {
    queue: Box<dyn MailboxQueue<M, R>>,
    /// A pool thread is inside `work` for this actor
    dispatching: bool,
}

struct ActorShared<M, R> {
    id: ActorId,
    group: ActorGroup,
    handler: Handler<M, R>,
    mailbox: Mutex<MailboxState<M, R>>,
    context: Mutex<Context>,
}

impl<M, R> ActorShared<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    fn pool(&self) -> &Arc<GroupShared> {
        &self.group.shared
    }

    /// Append `envelope` and submit the actor if it was idle.
    fn enqueue(self: &Arc<Self>, envelope: Envelope<M, R>, coalesce: bool) -> Result<Future<R>> {
        let (future, submit) = {
            let mut mailbox = self.mailbox.lock();

            let envelope = if coalesce {
                match mailbox.queue.coalesce(envelope.msg) {
                    Ok(queued) => {
                        self.pool()
                            .metrics()
                            .messages_coalesced
                            .fetch_add(1, Ordering::Relaxed);
                        return Ok(queued);
                    }
                    Err(msg) => Envelope {
                        msg,
                        future: envelope.future,
                    },
                }
            } else {
                envelope
            };

            let future = envelope.future.clone();
            let was_empty = mailbox.queue.is_empty();
            mailbox.queue.push(envelope);
            (future, was_empty && !mailbox.dispatching)
        };

        if submit {
            self.submit()?;
        }
        Ok(future)
    }

    fn submit(self: &Arc<Self>) -> Result<()> {
        let work: Arc<dyn Work> = Arc::clone(self) as Arc<dyn Work>;
        if let Err(err) = self.pool().submit(work) {
            let stranded = self.mailbox.lock().queue.take_all();
            error!(
                actor_id = %self.id,
                group = %self.pool().name(),
                stranded = stranded.len(),
                error = %err,
                "Could not schedule actor"
            );
            for envelope in stranded {
                envelope.future.fail(err.clone());
            }
            return Err(err);
        }
        Ok(())
    }

    fn dispatch(&self, cx: &mut Context, envelope: Envelope<M, R>) {
        if envelope.future.is_cancelled() {
            return;
        }
        if self.pool().is_killed() {
            if envelope.future.cancel() {
                self.pool().metrics().record_cancelled(1);
            }
            return;
        }

        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(cx, envelope.msg)));
        let elapsed = start.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                envelope.future.complete(value);
                self.pool().metrics().record_message_handled(elapsed, true);
            }
            Ok(Err(cause)) => {
                let err = wrap_error(cause);
                debug!(actor_id = %self.id, category = err.category(), error = %err, "Handler failed");
                envelope.future.fail(err);
                self.pool().metrics().record_message_handled(elapsed, false);
            }
            Err(payload) => {
                let err = from_panic(payload);
                warn!(actor_id = %self.id, error = %err, "Handler panicked");
                envelope.future.fail(err);
                self.pool().metrics().record_message_handled(elapsed, false);
            }
        }
    }
}

impl<M, R> Work for ActorShared<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    fn work(self: Arc<Self>) {
        let batch = {
            let mut mailbox = self.mailbox.lock();
            mailbox.dispatching = true;
            mailbox.queue.take_all()
        };

        {
            let mut cx = self.context.lock();
            for envelope in batch {
                self.dispatch(&mut cx, envelope);
            }
        }

        let resubmit = {
            let mut mailbox = self.mailbox.lock();
            mailbox.dispatching = false;
            !mailbox.queue.is_empty()
        };

        if resubmit {
            // Failures are logged and the backlog failed inside submit()
            let _ = self.submit();
        }
    }

    fn kill(&self) {
        let backlog = self.mailbox.lock().queue.take_all();
        let mut cancelled = 0;
        for envelope in backlog {
            if envelope.future.cancel() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(actor_id = %self.id, cancelled, "Cancelled queued messages");
            self.pool().metrics().record_cancelled(cancelled);
        }
    }
}

/// A message held back by a delay or another future, then enqueued.
struct HeldSend<M, R> {
    actor: Arc<ActorShared<M, R>>,
    envelope: Envelope<M, R>,
}

impl<M, R> Deferred for HeldSend<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    fn deliver(self: Box<Self>) {
        if self.actor.pool().is_stopped() {
            if self.envelope.future.cancel() {
                self.actor.pool().metrics().record_cancelled(1);
            }
            return;
        }
        // On failure the future is already failed by submit()
        let _ = self.actor.enqueue(self.envelope, false);
    }

    fn cancel(self: Box<Self>) {
        if self.envelope.future.cancel() {
            self.actor.pool().metrics().record_cancelled(1);
        }
    }
}

/// Handle to a mailbox actor. Cheap to clone.
pub struct Actor<M, R = ()> {
    shared: Arc<ActorShared<M, R>>,
}

impl<M, R> Clone for Actor<M, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M, R> fmt::Debug for Actor<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.shared.id)
            .field("group", &self.shared.group.name())
            .finish()
    }
}

impl<M, R> Actor<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    /// Create an actor with a FIFO mailbox.
    pub fn new<F>(group: &ActorGroup, handler: F) -> Self
    where
        F: Fn(&mut Context, M) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self::with_queue(group, Box::new(FifoQueue::new()), Box::new(handler))
    }

    /// Create an actor whose mailbox folds a new message into a queued
    /// one with the same key.
    ///
    /// `to_key` returning `None` opts a message out of coalescing.
    /// `coalesce(queued, incoming)` produces the replacement; senders of
    /// both messages share the queued message's [`Future`].
    pub fn coalescing<K, KF, CF, F>(group: &ActorGroup, to_key: KF, coalesce: CF, handler: F) -> Self
    where
        K: Eq + Hash + Send + 'static,
        KF: Fn(&M) -> Option<K> + Send + Sync + 'static,
        CF: Fn(&M, M) -> M + Send + Sync + 'static,
        F: Fn(&mut Context, M) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let queue: CoalescingQueue<M, R, K> =
            CoalescingQueue::new(Box::new(to_key), Box::new(coalesce));
        Self::with_queue(group, Box::new(queue), Box::new(handler))
    }

    fn with_queue(
        group: &ActorGroup,
        queue: Box<dyn MailboxQueue<M, R>>,
        handler: Handler<M, R>,
    ) -> Self {
        let id = ActorId::new();
        debug!(actor_id = %id, group = %group.name(), "Created actor");
        Self {
            shared: Arc::new(ActorShared {
                id,
                group: group.clone(),
                handler,
                mailbox: Mutex::new(MailboxState {
                    queue,
                    dispatching: false,
                }),
                context: Mutex::new(Context::new(id)),
            }),
        }
    }

    pub fn id(&self) -> ActorId {
        self.shared.id
    }

    pub fn group(&self) -> &ActorGroup {
        &self.shared.group
    }

    /// Messages waiting for the next drain
    pub fn queue_len(&self) -> usize {
        self.shared.mailbox.lock().queue.len()
    }

    /// Enqueue `msg` for processing.
    ///
    /// Fails with [`RuntimeError::Stopped`] once the group is stopped.
    ///
    /// Messages are moved rather than snapshotted, so a handle such as
    /// `Arc<Mutex<_>>` inside `msg` remains shared with the sender. Only
    /// results read back through [`Future::get`] go through [`Snapshot`](crate::Snapshot).
    pub fn send(&self, msg: M) -> Result<Future<R>> {
        self.check_running()?;
        self.shared
            .pool()
            .metrics()
            .messages_sent
            .fetch_add(1, Ordering::Relaxed);
        self.shared.enqueue(
            Envelope {
                msg,
                future: Future::new(),
            },
            true,
        )
    }

    /// Enqueue `msg` once `delay` has elapsed.
    ///
    /// The returned future is cancelled if the group stops first.
    pub fn send_later(&self, delay: Duration, msg: M) -> Result<Future<R>> {
        if delay.is_zero() {
            return Err(RuntimeError::invalid_argument(
                "delay must be positive",
                Some("delay"),
            ));
        }
        self.check_running()?;

        let future = Future::new();
        let held = HeldSend {
            actor: Arc::clone(&self.shared),
            envelope: Envelope {
                msg,
                future: future.clone(),
            },
        };
        self.shared.group.schedule(delay, Box::new(held))?;
        self.shared
            .pool()
            .metrics()
            .messages_sent
            .fetch_add(1, Ordering::Relaxed);
        Ok(future)
    }

    /// Enqueue `msg` once `after` reaches any terminal state.
    pub fn send_when_done<T>(&self, after: &Future<T>, msg: M) -> Result<Future<R>>
    where
        T: Send + 'static,
    {
        self.check_running()?;

        let future = Future::new();
        let held = HeldSend {
            actor: Arc::clone(&self.shared),
            envelope: Envelope {
                msg,
                future: future.clone(),
            },
        };
        self.shared
            .pool()
            .metrics()
            .messages_sent
            .fetch_add(1, Ordering::Relaxed);
        after.when_done(Box::new(held));
        Ok(future)
    }

    fn check_running(&self) -> Result<()> {
        if self.shared.group.is_stopped() {
            return Err(RuntimeError::stopped(format!(
                "actor group '{}'",
                self.shared.group.name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actor_config::GroupConfig;

    fn group(name: &str) -> ActorGroup {
        ActorGroup::new(
            name,
            GroupConfig {
                min_threads: 0,
                max_threads: 4,
                idle_timeout_ms: 1_000,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_context_locals() {
        let mut cx = Context::new(ActorId::new());
        assert!(cx.is_empty());
        assert!(!cx.insert("count", 1_u64));
        assert!(cx.insert("count", 2_u64));
        assert_eq!(cx.get::<u64>("count"), Some(&2));
        assert_eq!(cx.get::<String>("count"), None);

        *cx.get_mut::<u64>("count").unwrap() += 1;
        assert_eq!(cx.remove::<u64>("count"), Some(3));
        assert!(!cx.contains("count"));
    }

    #[test]
    fn test_actor_id_display() {
        let id = ActorId::new();
        assert!(id.to_string().starts_with("actor-"));
        assert_eq!(ActorId::from_uuid(id.uuid()), id);
    }

    #[test]
    fn test_send_and_get() {
        let group = group("echo");
        let actor = Actor::new(&group, |_cx, msg: u32| Ok(msg * 2));

        let future = actor.send(21).unwrap();
        assert_eq!(future.get(Some(Duration::from_secs(2))).unwrap(), Some(42));

        group.stop();
        group.join(Some(Duration::from_secs(2))).unwrap();
    }

    #[test]
    fn test_handler_error_fails_future_and_actor_continues() {
        let group = group("errors");
        let actor = Actor::new(&group, |_cx, msg: i32| {
            if msg < 0 {
                anyhow::bail!("negative input {}", msg);
            }
            Ok(msg)
        });

        let bad = actor.send(-1).unwrap();
        let good = actor.send(5).unwrap();
        match bad.get(Some(Duration::from_secs(2))) {
            Err(RuntimeError::Handler { message, .. }) => assert!(message.contains("negative")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(good.get(Some(Duration::from_secs(2))).unwrap(), Some(5));
        assert_eq!(group.stats().messages_failed, 1);
    }

    #[test]
    fn test_panic_is_captured() {
        let group = group("panics");
        let actor: Actor<u32, u32> = Actor::new(&group, |_cx, msg| {
            if msg == 0 {
                panic!("zero");
            }
            Ok(msg)
        });

        let boom = actor.send(0).unwrap();
        let after = actor.send(1).unwrap();
        assert!(matches!(
            boom.get(Some(Duration::from_secs(2))),
            Err(RuntimeError::Panicked { .. })
        ));
        assert_eq!(after.get(Some(Duration::from_secs(2))).unwrap(), Some(1));
    }

    #[test]
    fn test_locals_persist_across_messages() {
        let group = group("counter");
        let actor = Actor::new(&group, |cx, add: u64| {
            let total = cx.get::<u64>("total").copied().unwrap_or(0) + add;
            cx.insert("total", total);
            Ok(total)
        });

        for n in 1..=4 {
            actor.send(n).unwrap();
        }
        let last = actor.send(0).unwrap();
        assert_eq!(last.get(Some(Duration::from_secs(2))).unwrap(), Some(10));
    }

    #[test]
    fn test_send_after_stop_is_rejected() {
        let group = group("stopped");
        let actor = Actor::new(&group, |_cx, msg: u8| Ok(msg));
        group.stop();

        assert!(matches!(actor.send(1), Err(RuntimeError::Stopped { .. })));
        assert!(matches!(
            actor.send_later(Duration::from_millis(5), 1),
            Err(RuntimeError::Stopped { .. })
        ));
    }

    #[test]
    fn test_send_later_rejects_zero_delay() {
        let group = group("zero-delay");
        let actor = Actor::new(&group, |_cx, msg: u8| Ok(msg));
        assert!(matches!(
            actor.send_later(Duration::ZERO, 1),
            Err(RuntimeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_send_later_waits_for_delay() {
        let group = group("later");
        let actor = Actor::new(&group, |_cx, _msg: ()| Ok(Instant::now()));

        let sent = Instant::now();
        let future = actor.send_later(Duration::from_millis(50), ()).unwrap();
        let handled = future.get(Some(Duration::from_secs(2))).unwrap().unwrap();
        assert!(handled.duration_since(sent) >= Duration::from_millis(50));
    }

    #[test]
    fn test_send_when_done_follows_other_future() {
        let group = group("when-done");
        let actor = Actor::new(&group, |_cx, msg: &'static str| Ok(msg));

        let gate: Future<u8> = Future::new();
        let follow = actor.send_when_done(&gate, "after gate").unwrap();
        assert!(matches!(
            follow.get(Some(Duration::from_millis(30))),
            Err(RuntimeError::Timeout { .. })
        ));

        gate.complete(1);
        assert_eq!(
            follow.get(Some(Duration::from_secs(2))).unwrap(),
            Some("after gate")
        );
    }

    #[test]
    fn test_stop_cancels_delayed_sends() {
        let group = group("cancel-later");
        let actor = Actor::new(&group, |_cx, msg: u8| Ok(msg));

        let future = actor.send_later(Duration::from_secs(30), 1).unwrap();
        group.stop();
        assert!(matches!(
            future.get(Some(Duration::from_secs(1))),
            Err(RuntimeError::Cancelled)
        ));
    }

    #[test]
    fn test_coalescing_actor_merges_backlog() {
        let group = group("coalesce");
        let gate = Arc::new(parking_lot::Mutex::new(()));
        let held = gate.lock();

        let gate_in_handler = Arc::clone(&gate);
        let actor = Actor::coalescing(
            &group,
            |msg: &(&'static str, u32)| Some(msg.0),
            |queued: &(&'static str, u32), incoming: (&'static str, u32)| {
                (incoming.0, queued.1 + incoming.1)
            },
            move |_cx, msg: (&'static str, u32)| {
                let _guard = gate_in_handler.lock();
                Ok(msg.1)
            },
        );

        // First message blocks the drain so the rest pile up
        let first = actor.send(("a", 1)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let second = actor.send(("b", 10)).unwrap();
        let third = actor.send(("b", 5)).unwrap();
        assert!(second.ptr_eq(&third));
        assert_eq!(actor.queue_len(), 1);

        drop(held);
        assert_eq!(first.get(Some(Duration::from_secs(2))).unwrap(), Some(1));
        assert_eq!(second.get(Some(Duration::from_secs(2))).unwrap(), Some(15));
        assert_eq!(group.stats().messages_coalesced, 1);
    }
}
