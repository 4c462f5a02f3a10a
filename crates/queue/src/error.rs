//! Queue error types.
//!
//! Scheduling outcomes (collapsed admission, no matching executor, blocked
//! task) are plain return values. Only the conditions below end a `pop`.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("executor interrupted while parked")]
    Interrupted,

    #[error("queue is shutting down")]
    ShuttingDown,
}

/// Failure to create or run the executable of a task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid or unreadable fleet description.
#[derive(Debug, Error)]
pub enum FleetConfigError {
    #[error("fleet config error: {0}")]
    Invalid(String),

    #[error("fleet config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("fleet config I/O error: {0}")]
    Io(#[from] std::io::Error),
}
