//! Actor Runtime
//!
//! Two ways to run message-driven code over OS threads, sharing one
//! completion primitive ([`Future`]) and one error type ([`RuntimeError`]).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐    ┌──────────────────────────────┐
//! │      Mailbox actors      │    │        Named workers         │
//! │                          │    │                              │
//! │  Actor ─send─► queue     │    │  Worker ─send_sync─► mailbox │
//! │    │   (Future per msg)  │    │    │    (bounded, timers)    │
//! │    ▼                     │    │    ▼                         │
//! │  ActorGroup              │    │  ThreadReusePool             │
//! │  elastic pool, one drain │    │  lingering backing threads   │
//! │  per actor at a time     │    │  WorkerRegistry (names,      │
//! │                          │    │  capabilities)               │
//! └──────────────────────────┘    └──────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Messages to one actor are handled in send order, never concurrently.
//! - Every send gets an outcome: completed, failed, or cancelled. Killing a
//!   group cancels what has not started; stopping a worker fails queued
//!   synchronous sends with [`RuntimeError::WorkerStopped`].
//! - A handler error or panic is confined to its own message.
//!
//! # Examples
//!
//! ```rust
//! use actor_runtime::{Actor, ActorGroup};
//! use std::time::Duration;
//!
//! let group = ActorGroup::with_defaults("example");
//! let counter = Actor::new(&group, |cx, add: u64| {
//!     let total = cx.get::<u64>("total").copied().unwrap_or(0) + add;
//!     cx.insert("total", total);
//!     Ok(total)
//! });
//!
//! counter.send(2).unwrap();
//! let total = counter.send(3).unwrap().get(Some(Duration::from_secs(1))).unwrap();
//! assert_eq!(total, Some(5));
//!
//! group.stop();
//! group.join(Some(Duration::from_secs(1))).unwrap();
//! ```
//!
//! ```rust
//! use actor_runtime::WorkerSystem;
//!
//! let system = WorkerSystem::with_defaults();
//! let echo = system
//!     .worker::<String, String>()
//!     .name("echo")
//!     .receive(|_worker, msg| Ok(msg.to_uppercase()))
//!     .spawn()
//!     .unwrap();
//!
//! assert_eq!(echo.send_sync("hi".to_string()).unwrap(), "HI");
//! echo.stop();
//! ```

pub mod actor;
pub mod error;
pub mod future;
pub mod group;
pub mod mailbox;
pub mod metrics;
mod queue;
pub mod registry;
pub mod reuse;
mod scheduler;
pub mod snapshot;
pub mod system;
pub mod worker;

pub use actor::{Actor, ActorId, Context};
pub use error::{from_panic, wrap_error, Result, RuntimeError};
pub use future::{Future, FutureState};
pub use group::{ActorGroup, GroupState};
pub use mailbox::{Ticket, WorkerState};
pub use metrics::{GroupMetrics, GroupStats};
pub use registry::{ManagedWorker, WorkerRegistry};
pub use reuse::{Attached, BackingThread, TestAbort, ThreadReusePool};
pub use snapshot::{safe, Snapshot};
pub use system::WorkerSystem;
pub use worker::{current_worker_name, Worker, WorkerBuilder};

pub use actor_config::{GroupConfig, RuntimeConfig, WorkerConfig};
