//! Runtime defaults
//!
//! Default values shared by the actor group, named workers and the
//! backing-thread reuse pool.

/// Actor group (elastic thread pool) defaults
pub mod group {
    /// Threads kept alive even when idle
    pub const MIN_THREADS: usize = 0;

    /// Upper bound on concurrently running pool threads
    pub const MAX_THREADS: usize = 100;

    /// Idle time before a pool thread above the minimum exits (milliseconds)
    pub const IDLE_TIMEOUT_MS: u64 = 5_000;
}

/// Named worker defaults
pub mod worker {
    /// Messages queued before producers block
    pub const MAX_QUEUE_SIZE: usize = 1_000;

    /// Grace period a finished backing thread waits for a new worker (milliseconds)
    pub const LINGER_MS: u64 = 5_000;

    /// Timers this close to their deadline fire early (milliseconds).
    /// Most schedulers don't wake with finer resolution.
    pub const TIMER_TOLERANCE_MS: u64 = 10;

    /// Prefix for generated worker names
    pub const AUTO_NAME_PREFIX: &str = "worker";
}

/// Environment variable prefix for overrides, e.g. `ACTOR_RUNTIME_GROUP__MAX_THREADS`
pub const ENV_PREFIX: &str = "ACTOR_RUNTIME";
