//! Worker Mailbox
//!
//! Bounded message queue plus timer slots for a named worker. Producers
//! block while the queue is full; the consumer blocks until a message
//! arrives or the nearest timer is due. Due timers are delivered ahead of
//! queued messages.

use crate::error::{Result, RuntimeError};
use crate::future::Future;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Worker lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    New,
    Running,
    Dead,
}

/// Handle to a scheduled timer, returned by
/// [`Worker::schedule`](crate::Worker::schedule).
///
/// Carries the slot's generation so a ticket for a timer that already
/// fired can never cancel a later timer reusing the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    index: usize,
    generation: u64,
}

impl Ticket {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A queued message; `reply` is set for synchronous sends.
pub(crate) struct Delivery<M, R> {
    pub msg: M,
    pub reply: Option<Future<R>>,
}

struct Timer<M> {
    deadline: Instant,
    repeat: Option<Duration>,
    payload: M,
    copy: fn(&M) -> M,
}

struct TimerSlot<M> {
    generation: u64,
    timer: Option<Timer<M>>,
}

struct Inner<M, R> {
    state: WorkerState,
    queue: VecDeque<Delivery<M, R>>,
    peak: usize,
    timers: Vec<TimerSlot<M>>,
}

impl<M, R> Inner<M, R> {
    /// Take the first timer due within `tolerance` of `now`.
    fn fire_due(&mut self, now: Instant, tolerance: Duration) -> Option<M> {
        let horizon = now + tolerance;
        let slot = self
            .timers
            .iter_mut()
            .find(|slot| slot.timer.as_ref().map_or(false, |t| t.deadline <= horizon))?;

        let repeating = slot.timer.as_ref().and_then(|t| t.repeat);
        match repeating {
            Some(interval) => {
                let timer = slot.timer.as_mut()?;
                timer.deadline = now + interval;
                Some((timer.copy)(&timer.payload))
            }
            None => slot.timer.take().map(|t| t.payload),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .iter()
            .filter_map(|slot| slot.timer.as_ref().map(|t| t.deadline))
            .min()
    }
}

pub(crate) struct WorkerMailbox<M, R> {
    name: String,
    capacity: usize,
    tolerance: Duration,
    inner: Mutex<Inner<M, R>>,
    /// Consumer waits here for messages or timer changes
    not_empty: Condvar,
    /// Producers wait here for queue space
    not_full: Condvar,
}

impl<M, R> WorkerMailbox<M, R> {
    pub fn new(name: String, capacity: usize, tolerance: Duration) -> Self {
        Self {
            name,
            capacity,
            tolerance,
            inner: Mutex::new(Inner {
                state: WorkerState::New,
                queue: VecDeque::new(),
                peak: 0,
                timers: Vec::new(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    /// `New -> Running`
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            WorkerState::New => {
                inner.state = WorkerState::Running;
                Ok(())
            }
            WorkerState::Running => Err(RuntimeError::invalid_state(format!(
                "worker '{}' already started",
                self.name
            ))),
            WorkerState::Dead => Err(RuntimeError::invalid_state(format!(
                "worker '{}' is dead",
                self.name
            ))),
        }
    }

    /// Move to `Dead`, drop all timers and wake every waiter.
    ///
    /// Returns the undelivered backlog, or `None` if already dead.
    pub fn close(&self) -> Option<VecDeque<Delivery<M, R>>> {
        let mut inner = self.inner.lock();
        if inner.state == WorkerState::Dead {
            return None;
        }
        inner.state = WorkerState::Dead;
        for slot in inner.timers.iter_mut() {
            slot.timer = None;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
        Some(std::mem::take(&mut inner.queue))
    }

    /// Append a delivery, blocking while the queue is at capacity.
    pub fn enqueue(&self, delivery: Delivery<M, R>) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut waited = false;

        loop {
            if inner.state == WorkerState::Dead {
                return Err(if waited {
                    RuntimeError::interrupted(format!("enqueue to worker '{}'", self.name))
                } else {
                    RuntimeError::stopped(format!("worker '{}'", self.name))
                });
            }
            if inner.queue.len() < self.capacity {
                break;
            }
            self.not_full.wait(&mut inner);
            waited = true;
        }

        inner.queue.push_back(delivery);
        inner.peak = inner.peak.max(inner.queue.len());
        self.not_empty.notify_one();
        Ok(())
    }

    /// Next message for the consumer: a due timer, else the queue head.
    ///
    /// Fails with [`RuntimeError::Interrupted`] once the worker leaves
    /// `Running`.
    pub fn dequeue(&self) -> Result<Delivery<M, R>> {
        let mut inner = self.inner.lock();

        loop {
            if inner.state != WorkerState::Running {
                return Err(RuntimeError::interrupted(format!(
                    "dequeue on worker '{}'",
                    self.name
                )));
            }

            let now = Instant::now();
            if let Some(msg) = inner.fire_due(now, self.tolerance) {
                return Ok(Delivery { msg, reply: None });
            }

            if let Some(delivery) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return Ok(delivery);
            }

            match inner.next_deadline() {
                Some(deadline) => {
                    self.not_empty.wait_until(&mut inner, deadline);
                }
                None => self.not_empty.wait(&mut inner),
            }
        }
    }

    /// Arm a timer in the first free slot, growing the slot list if needed.
    pub fn schedule(
        &self,
        delay: Duration,
        payload: M,
        repeat: bool,
        copy: fn(&M) -> M,
    ) -> Result<Ticket> {
        if delay.is_zero() {
            return Err(RuntimeError::invalid_argument(
                "timer delay must be positive",
                Some("delay"),
            ));
        }
        let deadline = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| RuntimeError::invalid_argument("delay overflows clock", Some("delay")))?;

        let mut inner = self.inner.lock();
        if inner.state == WorkerState::Dead {
            return Err(RuntimeError::stopped(format!("worker '{}'", self.name)));
        }

        let index = match inner.timers.iter().position(|slot| slot.timer.is_none()) {
            Some(index) => index,
            None => {
                inner.timers.push(TimerSlot {
                    generation: 0,
                    timer: None,
                });
                inner.timers.len() - 1
            }
        };

        let slot = &mut inner.timers[index];
        slot.generation += 1;
        slot.timer = Some(Timer {
            deadline,
            repeat: repeat.then_some(delay),
            payload,
            copy,
        });
        let ticket = Ticket {
            index,
            generation: slot.generation,
        };

        // The consumer may be sleeping toward a later deadline
        self.not_empty.notify_one();
        Ok(ticket)
    }

    /// Clear the timer behind `ticket`. `Ok(false)` if it already fired
    /// (one-shot), was cancelled, or the slot now belongs to another timer.
    pub fn cancel(&self, ticket: Ticket) -> Result<bool> {
        let mut inner = self.inner.lock();
        let slot = inner.timers.get_mut(ticket.index).ok_or_else(|| {
            RuntimeError::invalid_argument(
                format!("no timer slot {}", ticket.index),
                Some("ticket"),
            )
        })?;

        if slot.generation != ticket.generation || slot.timer.is_none() {
            return Ok(false);
        }
        slot.timer = None;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn peak(&self) -> usize {
        self.inner.lock().peak
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Armed timers
    pub fn timer_count(&self) -> usize {
        self.inner
            .lock()
            .timers
            .iter()
            .filter(|slot| slot.timer.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn mailbox(capacity: usize) -> Arc<WorkerMailbox<u32, u32>> {
        let mailbox = Arc::new(WorkerMailbox::new(
            "test".into(),
            capacity,
            Duration::from_millis(10),
        ));
        mailbox.start().unwrap();
        mailbox
    }

    fn copy(v: &u32) -> u32 {
        *v
    }

    fn send(mailbox: &WorkerMailbox<u32, u32>, msg: u32) -> Result<()> {
        mailbox.enqueue(Delivery { msg, reply: None })
    }

    #[test]
    fn test_start_only_once() {
        let mailbox = mailbox(4);
        assert_eq!(mailbox.state(), WorkerState::Running);
        assert!(matches!(mailbox.start(), Err(RuntimeError::InvalidState { .. })));
    }

    #[test]
    fn test_fifo_and_peak() {
        let mailbox = mailbox(8);
        for n in 0..3 {
            send(&mailbox, n).unwrap();
        }
        assert_eq!(mailbox.peak(), 3);
        for n in 0..3 {
            assert_eq!(mailbox.dequeue().unwrap().msg, n);
        }
        assert_eq!(mailbox.len(), 0);
        assert_eq!(mailbox.peak(), 3);
    }

    #[test]
    fn test_producer_blocks_at_capacity() {
        let mailbox = mailbox(1);
        send(&mailbox, 1).unwrap();

        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || send(&mailbox, 2))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!producer.is_finished());
        assert_eq!(mailbox.len(), 1);

        assert_eq!(mailbox.dequeue().unwrap().msg, 1);
        producer.join().unwrap().unwrap();
        assert_eq!(mailbox.dequeue().unwrap().msg, 2);
        assert_eq!(mailbox.peak(), 1);
    }

    #[test]
    fn test_blocked_producer_interrupted_by_close() {
        let mailbox = mailbox(1);
        send(&mailbox, 1).unwrap();

        let producer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || send(&mailbox, 2))
        };
        thread::sleep(Duration::from_millis(20));
        let backlog = mailbox.close().unwrap();
        assert_eq!(backlog.len(), 1);
        assert!(matches!(
            producer.join().unwrap(),
            Err(RuntimeError::Interrupted { .. })
        ));

        assert!(matches!(send(&mailbox, 3), Err(RuntimeError::Stopped { .. })));
        assert!(mailbox.close().is_none());
    }

    #[test]
    fn test_consumer_interrupted_by_close() {
        let mailbox = mailbox(4);
        let consumer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.dequeue().map(|d| d.msg))
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert!(matches!(
            consumer.join().unwrap(),
            Err(RuntimeError::Interrupted { .. })
        ));
    }

    #[test]
    fn test_due_timer_wins_over_queue() {
        let mailbox = mailbox(4);
        mailbox
            .schedule(Duration::from_millis(5), 99, false, copy)
            .unwrap();
        thread::sleep(Duration::from_millis(10));
        send(&mailbox, 1).unwrap();

        assert_eq!(mailbox.dequeue().unwrap().msg, 99);
        assert_eq!(mailbox.dequeue().unwrap().msg, 1);
        assert_eq!(mailbox.timer_count(), 0);
    }

    #[test]
    fn test_consumer_wakes_for_timer() {
        let mailbox = mailbox(4);
        let start = Instant::now();
        mailbox
            .schedule(Duration::from_millis(40), 7, false, copy)
            .unwrap();

        let delivery = mailbox.dequeue().unwrap();
        assert_eq!(delivery.msg, 7);
        assert!(delivery.reply.is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_repeating_timer_rearms() {
        let mailbox = mailbox(4);
        let ticket = mailbox
            .schedule(Duration::from_millis(15), 5, true, copy)
            .unwrap();

        for _ in 0..3 {
            assert_eq!(mailbox.dequeue().unwrap().msg, 5);
        }
        assert_eq!(mailbox.timer_count(), 1);
        assert!(mailbox.cancel(ticket).unwrap());
        assert_eq!(mailbox.timer_count(), 0);
    }

    #[test]
    fn test_stale_ticket_cannot_cancel_reused_slot() {
        let mailbox = mailbox(4);
        let first = mailbox
            .schedule(Duration::from_millis(1), 1, false, copy)
            .unwrap();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(mailbox.dequeue().unwrap().msg, 1);

        let second = mailbox
            .schedule(Duration::from_secs(60), 2, false, copy)
            .unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());

        assert!(!mailbox.cancel(first).unwrap());
        assert_eq!(mailbox.timer_count(), 1);
        assert!(mailbox.cancel(second).unwrap());
        assert!(!mailbox.cancel(second).unwrap());
    }

    #[test]
    fn test_schedule_validation() {
        let mailbox = mailbox(4);
        assert!(matches!(
            mailbox.schedule(Duration::ZERO, 1, false, copy),
            Err(RuntimeError::InvalidArgument { .. })
        ));

        let bogus = Ticket {
            index: 12,
            generation: 1,
        };
        assert!(matches!(
            mailbox.cancel(bogus),
            Err(RuntimeError::InvalidArgument { .. })
        ));
    }
}
