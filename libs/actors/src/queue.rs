//! Actor Mailbox Queues
//!
//! The queue behind each [`Actor`](crate::Actor). Callers only append and
//! take the whole backlog at once, so the representation stays private.

use crate::future::Future;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A queued message and the cell that will receive its outcome
pub(crate) struct Envelope<M, R> {
    pub msg: M,
    pub future: Future<R>,
}

/// Queue operations the actor's drain protocol relies on.
///
/// All calls happen under the owning actor's lock.
pub(crate) trait MailboxQueue<M, R>: Send {
    fn push(&mut self, envelope: Envelope<M, R>);

    /// Merge `msg` into a message that is still queued. On success the
    /// queued message's future is returned; otherwise `msg` comes back.
    fn coalesce(&mut self, msg: M) -> Result<Future<R>, M>;

    /// Take the entire backlog, leaving the queue empty.
    fn take_all(&mut self) -> VecDeque<Envelope<M, R>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plain FIFO mailbox
pub(crate) struct FifoQueue<M, R> {
    entries: VecDeque<Envelope<M, R>>,
}

impl<M, R> FifoQueue<M, R> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<M: Send, R: Send> MailboxQueue<M, R> for FifoQueue<M, R> {
    fn push(&mut self, envelope: Envelope<M, R>) {
        self.entries.push_back(envelope);
    }

    fn coalesce(&mut self, msg: M) -> Result<Future<R>, M> {
        Err(msg)
    }

    fn take_all(&mut self) -> VecDeque<Envelope<M, R>> {
        std::mem::take(&mut self.entries)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub(crate) type KeyFn<M, K> = Box<dyn Fn(&M) -> Option<K> + Send + Sync>;
pub(crate) type MergeFn<M> = Box<dyn Fn(&M, M) -> M + Send + Sync>;

/// Mailbox that folds a new message into a queued one with the same key.
///
/// Messages whose key function returns `None` are never coalesced.
pub(crate) struct CoalescingQueue<M, R, K> {
    entries: VecDeque<Envelope<M, R>>,
    /// key -> index into `entries`; indices stay valid because entries are
    /// only appended until the next `take_all`
    pending: HashMap<K, usize>,
    to_key: KeyFn<M, K>,
    merge: MergeFn<M>,
}

impl<M, R, K> CoalescingQueue<M, R, K> {
    pub fn new(to_key: KeyFn<M, K>, merge: MergeFn<M>) -> Self {
        Self {
            entries: VecDeque::new(),
            pending: HashMap::new(),
            to_key,
            merge,
        }
    }
}

impl<M, R, K> MailboxQueue<M, R> for CoalescingQueue<M, R, K>
where
    M: Send,
    R: Send,
    K: Eq + Hash + Send,
{
    fn push(&mut self, envelope: Envelope<M, R>) {
        if let Some(key) = (self.to_key)(&envelope.msg) {
            self.pending.insert(key, self.entries.len());
        }
        self.entries.push_back(envelope);
    }

    fn coalesce(&mut self, msg: M) -> Result<Future<R>, M> {
        let Some(key) = (self.to_key)(&msg) else {
            return Err(msg);
        };
        let Some(&index) = self.pending.get(&key) else {
            return Err(msg);
        };

        let queued = &mut self.entries[index];
        queued.msg = (self.merge)(&queued.msg, msg);
        Ok(queued.future.clone())
    }

    fn take_all(&mut self) -> VecDeque<Envelope<M, R>> {
        self.pending.clear();
        std::mem::take(&mut self.entries)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
