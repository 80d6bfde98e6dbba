//! Runtime Error Types
//!
//! Error handling for actor sends, result cells, named workers and
//! the thread pools underneath them.

use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Shared, cloneable error source
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Main runtime error type
///
/// Cloneable so a failed [`Future`](crate::Future) can hand the same error to
/// every reader.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// Send rejected because the target no longer accepts messages
    #[error("Rejected send: {target} is stopped")]
    Stopped { target: String },

    /// Message cancelled before a dispatcher reached it
    #[error("Message cancelled")]
    Cancelled,

    /// Message handler returned an error
    #[error("Handler error: {message}")]
    Handler {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    /// Message handler or run body panicked
    #[error("Handler panicked: {message}")]
    Panicked { message: String },

    /// Blocking wait abandoned because its target went away
    #[error("Interrupted: {operation}")]
    Interrupted { operation: String },

    /// Blocking wait exceeded its timeout
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Named worker stopped before the message was delivered
    #[error("Worker '{name}' stopped before delivery")]
    WorkerStopped { name: String },

    /// Worker name already registered
    #[error("Duplicate worker name: {name}")]
    DuplicateName { name: String },

    /// Caller passed a value the runtime cannot use
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        field: Option<String>,
    },

    /// Operation not valid in the target's current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// OS thread could not be created
    #[error("Thread spawn failed: {message}")]
    Spawn {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    /// Create a rejected-send error
    pub fn stopped(target: impl Into<String>) -> Self {
        Self::Stopped {
            target: target.into(),
        }
    }

    /// Create a handler error without a source
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            source: None,
        }
    }

    /// Create an interrupted-wait error
    pub fn interrupted(operation: impl Into<String>) -> Self {
        Self::Interrupted {
            operation: operation.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a worker-stopped error
    pub fn worker_stopped(name: impl Into<String>) -> Self {
        Self::WorkerStopped { name: name.into() }
    }

    /// Create a duplicate name error
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a spawn error from the OS failure
    pub fn spawn(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Whether the message never reached its handler
    pub fn is_undelivered(&self) -> bool {
        matches!(
            self,
            RuntimeError::Cancelled | RuntimeError::WorkerStopped { .. }
        )
    }

    /// Check if retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RuntimeError::Timeout { .. } => true,
            RuntimeError::Spawn { .. } => true,
            RuntimeError::Interrupted { .. } => true,
            RuntimeError::Stopped { .. } => false,
            RuntimeError::Cancelled => false,
            RuntimeError::Handler { .. } => false,
            RuntimeError::Panicked { .. } => false,
            RuntimeError::WorkerStopped { .. } => false,
            RuntimeError::DuplicateName { .. } => false,
            RuntimeError::InvalidArgument { .. } => false,
            RuntimeError::InvalidState { .. } => false,
        }
    }

    /// Get error category for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            RuntimeError::Stopped { .. } => "stopped",
            RuntimeError::Cancelled => "cancelled",
            RuntimeError::Handler { .. } => "handler",
            RuntimeError::Panicked { .. } => "panicked",
            RuntimeError::Interrupted { .. } => "interrupted",
            RuntimeError::Timeout { .. } => "timeout",
            RuntimeError::WorkerStopped { .. } => "worker_stopped",
            RuntimeError::DuplicateName { .. } => "duplicate_name",
            RuntimeError::InvalidArgument { .. } => "invalid_argument",
            RuntimeError::InvalidState { .. } => "invalid_state",
            RuntimeError::Spawn { .. } => "spawn",
        }
    }
}

/// Normalize a handler failure into a [`RuntimeError`].
///
/// A `RuntimeError` travelling inside the `anyhow::Error` (for example one
/// re-raised from another future) is returned as is.
pub fn wrap_error(cause: anyhow::Error) -> RuntimeError {
    match cause.downcast::<RuntimeError>() {
        Ok(runtime) => runtime,
        Err(cause) => {
            let message = format!("{:#}", cause);
            let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = cause.into();
            RuntimeError::Handler {
                message,
                source: Some(Arc::from(boxed)),
            }
        }
    }
}

/// Turn a caught panic payload into a [`RuntimeError`]
pub fn from_panic(payload: Box<dyn Any + Send>) -> RuntimeError {
    RuntimeError::Panicked {
        message: panic_message(payload.as_ref()),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
