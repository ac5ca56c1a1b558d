//! Error types for Insight Core
//!
//! Provides error handling for:
//! - Work failures captured on a task
//! - Registry lookups and lifecycle transitions
//! - Submission refusals
//! - Configuration loading

use crate::types::{TaskId, TaskStatus};

/// Error returned by a unit of work
///
/// The `Display` text is what gets recorded on the task and sent in
/// `task_failed` events.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Work reported a failure
    #[error("{0}")]
    Failed(String),

    /// Work rejected its input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Work exceeded the configured maximum duration
    #[error("task timed out after {secs}s")]
    Timeout {
        /// Configured limit in seconds
        secs: u64,
    },

    /// Work panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Any other error raised by the work
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    /// Create a plain failure
    #[inline]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Check if the failure came from the executor rather than the work
    #[inline]
    #[must_use]
    pub fn is_executor_imposed(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Panicked(_))
    }
}

/// Task registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No task with this identifier
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Task already reached a terminal status
    #[error("task {0} is already terminal")]
    AlreadyTerminal(TaskId),

    /// Transition not allowed by the lifecycle
    #[error("illegal transition for task {id}: {from} -> {to}")]
    IllegalTransition {
        /// Task identifier
        id: TaskId,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },
}

/// Submission errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Service is shutting down and no longer accepts work
    #[error("service is shutting down")]
    ShuttingDown,

    /// No work is registered under this kind
    #[error("unknown task kind: {0}")]
    UnknownKind(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
