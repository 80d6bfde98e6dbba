//! # Actor Runtime Configuration
//!
//! Centralized configuration and defaults for the actor runtime:
//! the elastic pool behind actor groups, named worker queues and timers,
//! and the backing-thread reuse pool.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actor_config::{load_config, RuntimeConfig};
//!
//! // config/runtime.toml, then config/environments/dev.toml, then ACTOR_RUNTIME_* vars
//! let config: RuntimeConfig = load_config(Some("dev")).unwrap();
//! assert!(config.group.max_threads > 0);
//! ```

pub mod defaults;
pub mod runtime_config;

// Re-export commonly used types
pub use runtime_config::{load_config, GroupConfig, RuntimeConfig, WorkerConfig};
