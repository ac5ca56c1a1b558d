//! Core types for task tracking
//!
//! Defines the fundamental records shared by the registry, executor and hub:
//! - Task and subscriber identifiers
//! - Task lifecycle status
//! - Task metadata, full task records and the polling snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use ulid::Ulid;

/// Unique task identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Generate new task ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Identity of the end user owning a notification stream and a set of tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub u64);

impl From<u64> for SubscriberId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriberId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Task lifecycle status
///
/// Transitions are monotonic: `Pending -> Processing -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Submitted, waiting for an execution slot
    Pending,
    /// Work is running
    Processing,
    /// Work returned a value
    Completed,
    /// Work returned an error, panicked or timed out
    Failed,
}

impl TaskStatus {
    /// Wire name of the status
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Check if moving to `next` is a legal transition
    #[must_use]
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (*self, next),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to a task at submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Owner of the task; lifecycle events are routed here when set
    pub subscriber: Option<SubscriberId>,
    /// Free-form attributes (article id, selection, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl TaskMetadata {
    /// Create empty metadata
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata owned by a subscriber
    #[inline]
    #[must_use]
    pub fn for_subscriber(subscriber: impl Into<SubscriberId>) -> Self {
        Self {
            subscriber: Some(subscriber.into()),
            attributes: BTreeMap::new(),
        }
    }

    /// With an extra attribute
    #[inline]
    #[must_use]
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// One unit of deferred work and its tracked lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Task kind tag (e.g. `article_analysis`)
    pub kind: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Submission metadata
    pub metadata: TaskMetadata,
    /// Result payload, set only on completion
    pub result: Option<serde_json::Value>,
    /// Error description, set only on failure
    pub error: Option<String>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Transition to processing
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task
    #[must_use]
    pub fn new(kind: impl Into<String>, metadata: TaskMetadata) -> Self {
        Self {
            id: TaskId::new(),
            kind: kind.into(),
            status: TaskStatus::Pending,
            metadata,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Owning subscriber, if any
    #[inline]
    #[must_use]
    pub fn subscriber(&self) -> Option<SubscriberId> {
        self.metadata.subscriber
    }

    /// Time spent between start and terminal transition
    #[must_use]
    pub fn processing_time(&self) -> Option<Duration> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        (completed - started).to_std().ok()
    }

    /// Polling view of this task
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id,
            task_type: self.kind.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// What `get_task` hands back to request handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier
    pub task_id: TaskId,
    /// Task kind tag
    pub task_type: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Result payload when completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error description when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Transition to processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
