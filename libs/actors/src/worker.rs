//! Named Workers
//!
//! A [`Worker`] is a registered, uniquely named consumer with a bounded
//! mailbox and software timers. Its body runs on a backing thread borrowed
//! from a [`ThreadReusePool`]; the default body is a message loop that
//! hands every dequeued message to the `receive` handler.
//!
//! Lifecycle: `New` (built and registered) -> `Running` (started, services
//! mounted) -> `Dead` (stopped, unregistered, backlog failed).

use crate::error::{from_panic, wrap_error, Result, RuntimeError};
use crate::future::Future;
use crate::mailbox::{Delivery, Ticket, WorkerMailbox, WorkerState};
use crate::registry::{validate_name, ManagedWorker, WorkerRegistry};
use crate::reuse::{Attached, ThreadReusePool};
use crate::snapshot::Snapshot;
use actor_config::defaults::worker::AUTO_NAME_PREFIX;
use actor_config::WorkerConfig;
use parking_lot::{Condvar, Mutex};
use std::any::{type_name, Any};
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

thread_local! {
    static CURRENT_WORKER: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Name of the worker whose body is running on this thread
pub fn current_worker_name() -> Option<String> {
    CURRENT_WORKER.with(|current| current.borrow().clone())
}

struct CurrentWorker;

impl CurrentWorker {
    fn enter(name: &str) -> Self {
        CURRENT_WORKER.with(|current| *current.borrow_mut() = Some(name.to_string()));
        CurrentWorker
    }
}

impl Drop for CurrentWorker {
    fn drop(&mut self) {
        CURRENT_WORKER.with(|current| *current.borrow_mut() = None);
    }
}

type MessageHandler<M, R> = Box<dyn Fn(&Worker<M, R>, M) -> anyhow::Result<R> + Send + Sync>;
type RunBody<M, R> = Box<dyn Fn(&Worker<M, R>) -> anyhow::Result<Option<R>> + Send + Sync>;
type Hook<M, R> = Box<dyn Fn(&Worker<M, R>) -> anyhow::Result<()> + Send + Sync>;

struct RunState<R> {
    body_running: bool,
    body_finished: bool,
    /// Consumed by the first `join`
    result: Option<Result<Option<R>>>,
}

struct WorkerShared<M, R> {
    id: Uuid,
    name: String,
    services: Vec<String>,
    mailbox: WorkerMailbox<M, R>,
    handler: Option<MessageHandler<M, R>>,
    body: RunBody<M, R>,
    on_start: Option<Hook<M, R>>,
    on_stop: Option<Hook<M, R>>,
    run: Mutex<RunState<R>>,
    run_done: Condvar,
    registry: Arc<WorkerRegistry>,
    threads: Arc<ThreadReusePool>,
}

/// Handle to a named worker. Cheap to clone.
pub struct Worker<M, R = ()> {
    shared: Arc<WorkerShared<M, R>>,
}

impl<M, R> Clone for Worker<M, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M, R> fmt::Debug for Worker<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.shared.name)
            .field("state", &self.shared.mailbox.state())
            .field("services", &self.shared.services)
            .finish()
    }
}

impl<M, R> Worker<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Unique per built worker, unlike the name
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> WorkerState {
        self.shared.mailbox.state()
    }

    pub fn services(&self) -> &[String] {
        &self.shared.services
    }

    /// Messages waiting in the mailbox
    pub fn queue_len(&self) -> usize {
        self.shared.mailbox.len()
    }

    /// Highest queue length seen
    pub fn peak(&self) -> usize {
        self.shared.mailbox.peak()
    }

    pub fn capacity(&self) -> usize {
        self.shared.mailbox.capacity()
    }

    /// Armed timers
    pub fn timer_count(&self) -> usize {
        self.shared.mailbox.timer_count()
    }

    pub fn ptr_eq(&self, other: &Worker<M, R>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Start the body on a backing thread and mount declared services.
    pub fn start(&self) -> Result<()> {
        {
            let mut run = self.shared.run.lock();
            self.shared.mailbox.start()?;
            run.body_running = true;
        }

        self.shared.registry.mount_services(Arc::new(self.clone()));
        if self.state() == WorkerState::Dead {
            // Stopped before the services went in
            self.shared.registry.unmount_services(self);
        }

        info!(worker = %self.shared.name, services = ?self.shared.services, "Starting worker");

        let attached: Arc<dyn Attached> = Arc::new(self.clone());
        if let Err(err) = self.shared.threads.start(attached) {
            {
                let mut run = self.shared.run.lock();
                run.body_running = false;
                run.body_finished = true;
                run.result = Some(Err(err.clone()));
            }
            self.stop();
            return Err(err);
        }
        Ok(())
    }

    /// Stop the worker: no further sends, timers dropped, queued
    /// synchronous senders failed with [`RuntimeError::WorkerStopped`].
    ///
    /// A message already being handled runs to completion.
    pub fn stop(&self) {
        let Some(backlog) = self.shared.mailbox.close() else {
            return;
        };

        self.shared.registry.unmount_services(self);
        self.shared.registry.unregister(&self.shared.name);

        let mut dropped = 0;
        for delivery in backlog {
            match delivery.reply {
                Some(reply) => {
                    reply.fail(RuntimeError::worker_stopped(self.shared.name.clone()));
                }
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!(worker = %self.shared.name, dropped, "Dropped queued async messages on stop");
        }
        info!(worker = %self.shared.name, "Stopped worker");

        let _run = self.shared.run.lock();
        self.shared.run_done.notify_all();
    }

    /// Wait until the worker is dead and its body has returned, then take
    /// the body's result. Later joins return `Ok(None)`.
    ///
    /// Fails with [`RuntimeError::InvalidState`] if the worker was never
    /// started.
    pub fn join(&self, timeout: Option<Duration>) -> Result<Option<R>> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut run = self.shared.run.lock();
        if self.state() == WorkerState::New && !run.body_running {
            return Err(RuntimeError::invalid_state(format!(
                "worker '{}' not started",
                self.shared.name
            )));
        }

        while run.body_running || self.state() != WorkerState::Dead {
            match deadline {
                None => self.shared.run_done.wait(&mut run),
                Some(deadline) => {
                    let timed_out = self
                        .shared
                        .run_done
                        .wait_until(&mut run, deadline)
                        .timed_out();
                    if timed_out && (run.body_running || self.state() != WorkerState::Dead) {
                        return Err(RuntimeError::timeout(
                            "Worker.join",
                            timeout.map_or(0, |t| t.as_millis() as u64),
                        ));
                    }
                }
            }
        }

        match run.result.take() {
            Some(result) => result,
            None => Ok(None),
        }
    }

    /// Queue `msg` without waiting for it to be handled. Blocks while the
    /// mailbox is full. Handler failures are only logged.
    ///
    /// `msg` is moved, not snapshotted: handles inside it such as
    /// `Arc<Mutex<_>>` stay shared with the sender.
    pub fn send_async(&self, msg: M) -> Result<()> {
        self.shared.mailbox.enqueue(Delivery { msg, reply: None })
    }

    /// Queue `msg` and block until the worker has handled it. Like
    /// [`send_async`](Self::send_async), shared handles inside `msg` are
    /// not copied.
    pub fn send_sync(&self, msg: M) -> Result<R> {
        if current_worker_name().as_deref() == Some(self.shared.name.as_str()) {
            return Err(RuntimeError::invalid_state(format!(
                "worker '{}' cannot send_sync to itself",
                self.shared.name
            )));
        }
        if self.shared.run.lock().body_finished {
            return Err(RuntimeError::invalid_state(format!(
                "worker '{}' has exited its loop",
                self.shared.name
            )));
        }

        let reply = Future::new();
        self.shared.mailbox.enqueue(Delivery {
            msg,
            reply: Some(reply.clone()),
        })?;

        reply.take(None)?.ok_or_else(|| {
            RuntimeError::invalid_state(format!(
                "reply from worker '{}' was already consumed",
                self.shared.name
            ))
        })
    }

    /// Clear a timer. `Ok(false)` if it already fired or was cancelled.
    pub fn cancel_schedule(&self, ticket: Ticket) -> Result<bool> {
        self.shared.mailbox.cancel(ticket)
    }

    /// Process messages with the `receive` handler until the worker stops.
    pub fn run_loop(&self) -> Result<()> {
        let handler = self.shared.handler.as_ref().ok_or_else(|| {
            RuntimeError::invalid_state(format!(
                "worker '{}' has no receive handler",
                self.shared.name
            ))
        })?;
        self.drive(handler.as_ref())
    }

    /// Process messages with `handler` until the worker stops.
    pub fn run_loop_with<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Worker<M, R>, M) -> anyhow::Result<R>,
    {
        self.drive(&handler)
    }

    fn run_body(&self) -> Result<Option<R>> {
        let outcome = (self.shared.body)(self).map_err(wrap_error);
        if let Err(err) = &outcome {
            error!(
                worker = %self.shared.name,
                error = %err,
                error_category = err.category(),
                "Worker body failed"
            );
        }
        outcome
    }

    fn run_hook(&self, hook: Option<&Hook<M, R>>, phase: &'static str) -> Result<()> {
        let Some(hook) = hook else {
            return Ok(());
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| hook(self))) {
            Ok(result) => result.map_err(wrap_error),
            Err(payload) => Err(from_panic(payload)),
        };
        if let Err(err) = &outcome {
            error!(
                worker = %self.shared.name,
                hook = phase,
                error = %err,
                error_category = err.category(),
                "Worker lifecycle hook failed"
            );
        }
        outcome
    }

    fn drive(&self, handler: &dyn Fn(&Worker<M, R>, M) -> anyhow::Result<R>) -> Result<()> {
        loop {
            match self.shared.mailbox.dequeue() {
                Ok(delivery) => self.dispatch(handler, delivery),
                Err(_) if self.state() == WorkerState::Dead => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    fn dispatch(
        &self,
        handler: &dyn Fn(&Worker<M, R>, M) -> anyhow::Result<R>,
        delivery: Delivery<M, R>,
    ) {
        let Delivery { msg, reply } = delivery;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler(self, msg))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => Err(wrap_error(cause)),
            Err(payload) => Err(from_panic(payload)),
        };

        match (reply, outcome) {
            (Some(reply), Ok(value)) => {
                reply.complete(value);
            }
            (Some(reply), Err(err)) => {
                debug!(worker = %self.shared.name, error = %err, "Sync message failed");
                reply.fail(err);
            }
            (None, Ok(_)) => {}
            (None, Err(err)) => {
                error!(
                    worker = %self.shared.name,
                    error = %err,
                    error_category = err.category(),
                    "Async message failed"
                );
            }
        }
    }
}

impl<M, R> Worker<M, R>
where
    M: Snapshot,
    R: Send + 'static,
{
    /// Deliver `msg` to this worker after `delay`; with `repeat`, every
    /// `delay` after that, each firing getting its own snapshot of `msg`.
    pub fn schedule(&self, delay: Duration, msg: M, repeat: bool) -> Result<Ticket> {
        let ticket = self
            .shared
            .mailbox
            .schedule(delay, msg, repeat, <M as Snapshot>::snapshot)?;
        debug!(
            worker = %self.shared.name,
            slot = ticket.index(),
            delay_ms = delay.as_millis() as u64,
            repeat,
            "Scheduled timer"
        );
        Ok(ticket)
    }
}

impl<M, R> ManagedWorker for Worker<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    fn id(&self) -> Uuid {
        self.shared.id
    }

    fn name(&self) -> &str {
        &self.shared.name
    }

    fn state(&self) -> WorkerState {
        self.shared.mailbox.state()
    }

    fn services(&self) -> &[String] {
        &self.shared.services
    }

    fn stop(&self) {
        Worker::stop(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<M, R> Attached for Worker<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &str {
        &self.shared.name
    }

    /// Runs `on_start`, the body, then `on_stop`. The stop hook runs even
    /// when the start hook or the body fails; a body panic is re-raised
    /// afterwards for the backing thread to report.
    fn run_attached(&self) {
        let _current = CurrentWorker::enter(&self.shared.name);

        let body = match self.run_hook(self.shared.on_start.as_ref(), "on_start") {
            Ok(()) => panic::catch_unwind(AssertUnwindSafe(|| self.run_body())),
            Err(err) => Ok(Err(err)),
        };
        let stopped = self.run_hook(self.shared.on_stop.as_ref(), "on_stop");

        match body {
            Ok(outcome) => {
                let outcome = match (outcome, stopped) {
                    (Ok(_), Err(err)) => Err(err),
                    (outcome, _) => outcome,
                };
                self.shared.run.lock().result = Some(outcome);
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn detach(&self, panic: Option<RuntimeError>) {
        {
            let mut run = self.shared.run.lock();
            run.body_finished = true;
            if let Some(err) = panic {
                run.result = Some(Err(err));
            }
        }

        self.stop();

        let mut run = self.shared.run.lock();
        run.body_running = false;
        self.shared.run_done.notify_all();
        debug!(worker = %self.shared.name, "Worker detached from backing thread");
    }
}

/// Builder for [`Worker`]; obtained from
/// [`WorkerSystem::worker`](crate::WorkerSystem::worker).
pub struct WorkerBuilder<M, R = ()> {
    registry: Arc<WorkerRegistry>,
    threads: Arc<ThreadReusePool>,
    config: WorkerConfig,
    name: Option<String>,
    capacity: Option<usize>,
    services: Vec<String>,
    handler: Option<MessageHandler<M, R>>,
    body: Option<RunBody<M, R>>,
    on_start: Option<Hook<M, R>>,
    on_stop: Option<Hook<M, R>>,
}

impl<M, R> WorkerBuilder<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(
        registry: Arc<WorkerRegistry>,
        threads: Arc<ThreadReusePool>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            registry,
            threads,
            config,
            name: None,
            capacity: None,
            services: Vec::new(),
            handler: None,
            body: None,
            on_start: None,
            on_stop: None,
        }
    }

    /// Unique name; generated as `worker.<n>` when omitted
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mailbox capacity; defaults to `max_queue_size`
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Declare a capability marker
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.services.push(service.into());
        self
    }

    /// Declare a capability marker named after `T`
    pub fn service_type<T: ?Sized>(self) -> Self {
        self.service(type_name::<T>())
    }

    /// Message handler used by the default run loop
    pub fn receive<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Worker<M, R>, M) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Replace the default run loop. The body's return value becomes the
    /// result of [`Worker::join`].
    pub fn run<F>(mut self, body: F) -> Self
    where
        F: Fn(&Worker<M, R>) -> anyhow::Result<Option<R>> + Send + Sync + 'static,
    {
        self.body = Some(Box::new(body));
        self
    }

    /// Called on the backing thread before the body. A failure is logged
    /// and becomes the result of [`Worker::join`]; the body is skipped.
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Worker<M, R>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Called on the backing thread once the body returns, fails or
    /// panics.
    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Worker<M, R>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_stop = Some(Box::new(hook));
        self
    }

    /// Create and register the worker in the `New` state.
    pub fn build(self) -> Result<Worker<M, R>> {
        if self.handler.is_none() && self.body.is_none() {
            return Err(RuntimeError::invalid_argument(
                "worker needs a receive handler or a run body",
                None,
            ));
        }
        let capacity = self.capacity.unwrap_or(self.config.max_queue_size);
        if capacity == 0 {
            return Err(RuntimeError::invalid_argument(
                "capacity must be positive",
                Some("capacity"),
            ));
        }

        let name = match self.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => self.registry.auto_name(AUTO_NAME_PREFIX),
        };

        let body: RunBody<M, R> = match self.body {
            Some(body) => body,
            None => Box::new(|worker: &Worker<M, R>| -> anyhow::Result<Option<R>> {
                worker.run_loop()?;
                Ok(None)
            }),
        };

        let worker = Worker {
            shared: Arc::new(WorkerShared {
                id: Uuid::new_v4(),
                mailbox: WorkerMailbox::new(
                    name.clone(),
                    capacity,
                    self.config.timer_tolerance(),
                ),
                name,
                services: self.services,
                handler: self.handler,
                body,
                on_start: self.on_start,
                on_stop: self.on_stop,
                run: Mutex::new(RunState {
                    body_running: false,
                    body_finished: false,
                    result: None,
                }),
                run_done: Condvar::new(),
                registry: self.registry,
                threads: self.threads,
            }),
        };

        worker.shared.registry.register(Arc::new(worker.clone()))?;
        debug!(worker = %worker.shared.name, capacity, "Built worker");
        Ok(worker)
    }

    /// Build and start in one step
    pub fn spawn(self) -> Result<Worker<M, R>> {
        let worker = self.build()?;
        worker.start()?;
        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> (Arc<WorkerRegistry>, Arc<ThreadReusePool>) {
        (
            Arc::new(WorkerRegistry::new()),
            ThreadReusePool::new(Duration::from_millis(200)),
        )
    }

    fn builder<M: Send + 'static, R: Send + 'static>(
        registry: &Arc<WorkerRegistry>,
        threads: &Arc<ThreadReusePool>,
    ) -> WorkerBuilder<M, R> {
        WorkerBuilder::new(registry.clone(), threads.clone(), WorkerConfig::default())
    }

    #[test]
    fn test_send_sync_round_trip() {
        let (registry, threads) = parts();
        let worker = builder::<u32, u32>(&registry, &threads)
            .name("doubler")
            .receive(|_w, msg| Ok(msg * 2))
            .spawn()
            .unwrap();

        assert_eq!(worker.send_sync(4).unwrap(), 8);
        assert_eq!(worker.state(), WorkerState::Running);

        worker.stop();
        assert_eq!(worker.join(Some(Duration::from_secs(2))).unwrap(), None);
        assert!(registry.find("doubler").is_none());
    }

    #[test]
    fn test_builder_requires_handler_or_body() {
        let (registry, threads) = parts();
        let result = builder::<u32, u32>(&registry, &threads).name("empty").build();
        assert!(matches!(result, Err(RuntimeError::InvalidArgument { .. })));

        let result = builder::<u32, u32>(&registry, &threads)
            .name("bad name")
            .receive(|_w, m| Ok(m))
            .build();
        assert!(matches!(result, Err(RuntimeError::InvalidArgument { .. })));
    }

    #[test]
    fn test_auto_name_and_services() {
        let (registry, threads) = parts();
        let worker = builder::<(), ()>(&registry, &threads)
            .service("cache")
            .service_type::<String>()
            .receive(|_w, _m| Ok(()))
            .build()
            .unwrap();
        assert!(worker.name().starts_with("worker."));
        assert_eq!(worker.state(), WorkerState::New);

        // Services are mounted on start, not at build
        assert!(registry.find_service("cache").is_none());
        worker.start().unwrap();
        assert_eq!(registry.find_service("cache").unwrap().name(), worker.name());
        assert!(registry.find_service(type_name::<String>()).is_some());

        worker.stop();
        assert!(registry.find_service("cache").is_none());
        assert!(matches!(worker.start(), Err(RuntimeError::InvalidState { .. })));
    }

    #[test]
    fn test_handler_error_reaches_sync_sender() {
        let (registry, threads) = parts();
        let worker = builder::<i32, i32>(&registry, &threads)
            .name("strict")
            .receive(|_w, msg| {
                anyhow::ensure!(msg >= 0, "negative: {}", msg);
                Ok(msg)
            })
            .spawn()
            .unwrap();

        assert!(matches!(worker.send_sync(-3), Err(RuntimeError::Handler { .. })));
        assert_eq!(worker.send_sync(3).unwrap(), 3);
        worker.stop();
    }

    #[test]
    fn test_self_send_sync_is_rejected() {
        let (registry, threads) = parts();
        let worker = builder::<u8, String>(&registry, &threads)
            .name("selfish")
            .receive(|w, msg| {
                if msg == 0 {
                    return match w.send_sync(1) {
                        Err(RuntimeError::InvalidState { .. }) => Ok("rejected".to_string()),
                        other => Ok(format!("{:?}", other)),
                    };
                }
                Ok("inner".to_string())
            })
            .spawn()
            .unwrap();

        assert_eq!(worker.send_sync(0).unwrap(), "rejected");
        worker.stop();
    }

    #[test]
    fn test_custom_body_result_joined_once() {
        let (registry, threads) = parts();
        let worker = builder::<(), u64>(&registry, &threads)
            .name("compute")
            .run(|_w| Ok(Some(42)))
            .spawn()
            .unwrap();

        assert_eq!(worker.join(Some(Duration::from_secs(2))).unwrap(), Some(42));
        assert_eq!(worker.join(Some(Duration::from_secs(2))).unwrap(), None);
        assert_eq!(worker.state(), WorkerState::Dead);
        assert!(matches!(worker.send_async(()), Err(RuntimeError::Stopped { .. })));
    }

    #[test]
    fn test_body_panic_surfaces_through_join() {
        let (registry, threads) = parts();
        let worker = builder::<(), ()>(&registry, &threads)
            .name("fragile")
            .run(|_w| panic!("body blew up"))
            .spawn()
            .unwrap();

        assert!(matches!(
            worker.join(Some(Duration::from_secs(2))),
            Err(RuntimeError::Panicked { .. })
        ));
    }

    #[test]
    fn test_join_times_out_while_running() {
        let (registry, threads) = parts();
        let worker = builder::<(), ()>(&registry, &threads)
            .name("idle")
            .receive(|_w, _m| Ok(()))
            .spawn()
            .unwrap();

        assert!(matches!(
            worker.join(Some(Duration::from_millis(20))),
            Err(RuntimeError::Timeout { .. })
        ));
        worker.stop();
        worker.join(Some(Duration::from_secs(2))).unwrap();
    }

    #[test]
    fn test_join_before_start_is_rejected() {
        let (registry, threads) = parts();
        let worker = builder::<(), ()>(&registry, &threads)
            .name("unstarted")
            .receive(|_w, _m| Ok(()))
            .build()
            .unwrap();

        let started = Instant::now();
        match worker.join(None) {
            Err(RuntimeError::InvalidState { message }) => assert!(message.contains("not started")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(worker.state(), WorkerState::New);

        worker.start().unwrap();
        worker.stop();
        assert_eq!(worker.join(Some(Duration::from_secs(2))).unwrap(), None);
    }

    #[test]
    fn test_failed_start_hook_skips_body() {
        let (registry, threads) = parts();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (ran_in_body, stopped_in_hook) = (ran.clone(), stopped.clone());

        let worker = builder::<(), u8>(&registry, &threads)
            .name("no-start")
            .on_start(|_w| anyhow::bail!("cannot open feed"))
            .on_stop(move |_w| {
                stopped_in_hook.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .run(move |_w| {
                ran_in_body.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(Some(1))
            })
            .spawn()
            .unwrap();

        assert!(matches!(
            worker.join(Some(Duration::from_secs(2))),
            Err(RuntimeError::Handler { .. })
        ));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(stopped.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(worker.state(), WorkerState::Dead);
    }

    #[test]
    fn test_current_worker_name() {
        let (registry, threads) = parts();
        assert_eq!(current_worker_name(), None);
        let worker = builder::<(), Option<String>>(&registry, &threads)
            .name("whoami")
            .receive(|_w, _m| Ok(current_worker_name()))
            .spawn()
            .unwrap();

        assert_eq!(worker.send_sync(()).unwrap(), Some("whoami".to_string()));
        worker.stop();
    }
}
