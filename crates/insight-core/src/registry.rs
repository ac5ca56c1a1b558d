//! Task registry
//!
//! Authoritative in-memory store of task state. Every mutation goes through
//! the map entry of that task, so concurrent transitions on one task are
//! serialized while different tasks proceed in parallel.
//!
//! Mutators log misuse (unknown ids, illegal transitions) and return the
//! error so callers can observe it; none of them panic.

use crate::error::RegistryError;
use crate::types::{Task, TaskId, TaskMetadata, TaskSnapshot, TaskStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// In-memory task store
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Task>,
}

impl TaskRegistry {
    /// Create an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new pending task and return its identifier
    pub fn create(&self, kind: impl Into<String>, metadata: TaskMetadata) -> TaskId {
        let task = Task::new(kind, metadata);
        let id = task.id;
        tracing::debug!(task_id = %id, kind = %task.kind, "task created");
        self.tasks.insert(id, task);
        id
    }

    /// Clone of the full task record
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|task| task.value().clone())
    }

    /// Polling view of a task
    #[must_use]
    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.tasks.get(&id).map(|task| task.snapshot())
    }

    /// Current status of a task
    #[must_use]
    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|task| task.status)
    }

    /// Move a pending task to processing and record the start time
    pub fn mark_processing(&self, id: TaskId) -> Result<Task, RegistryError> {
        self.transition(id, TaskStatus::Processing, |task, now| {
            task.started_at = Some(now);
        })
    }

    /// Complete a task with its result
    ///
    /// A task that is already terminal keeps its first outcome; the call
    /// logs a warning and returns [`RegistryError::AlreadyTerminal`].
    pub fn mark_completed(
        &self,
        id: TaskId,
        result: serde_json::Value,
    ) -> Result<Task, RegistryError> {
        self.transition(id, TaskStatus::Completed, move |task, now| {
            task.result = Some(result);
            task.completed_at = Some(now);
        })
    }

    /// Fail a task with an error description
    pub fn mark_failed(&self, id: TaskId, error: impl Into<String>) -> Result<Task, RegistryError> {
        let error = error.into();
        self.transition(id, TaskStatus::Failed, move |task, now| {
            task.error = Some(error);
            task.completed_at = Some(now);
        })
    }

    fn transition(
        &self,
        id: TaskId,
        next: TaskStatus,
        apply: impl FnOnce(&mut Task, DateTime<Utc>),
    ) -> Result<Task, RegistryError> {
        let Some(mut task) = self.tasks.get_mut(&id) else {
            tracing::error!(task_id = %id, to = %next, "transition on unknown task");
            return Err(RegistryError::NotFound(id));
        };

        if task.status.is_terminal() {
            tracing::warn!(
                task_id = %id,
                status = %task.status,
                to = %next,
                "task already terminal, keeping first outcome"
            );
            return Err(RegistryError::AlreadyTerminal(id));
        }

        if !task.status.can_transition_to(next) {
            tracing::error!(task_id = %id, from = %task.status, to = %next, "illegal transition");
            return Err(RegistryError::IllegalTransition {
                id,
                from: task.status,
                to: next,
            });
        }

        task.status = next;
        apply(&mut *task, Utc::now());
        Ok(task.clone())
    }

    /// Remove terminal tasks that completed more than `max_age` ago
    ///
    /// Returns the number of tasks removed. Pending and processing tasks are
    /// never touched.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return 0;
        };
        self.evict_completed_before(cutoff)
    }

    /// Remove terminal tasks whose completion time is before `cutoff`
    pub fn evict_completed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff))
        });
        let removed = before.saturating_sub(self.tasks.len());
        if removed > 0 {
            tracing::info!(removed, "evicted old tasks");
        }
        removed
    }

    /// Number of tracked tasks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if no task is tracked
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Count of tasks currently in `status`
    #[must_use]
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|task| task.status == status).count()
    }

    /// Drop every task
    pub fn reset(&self) {
        self.tasks.clear();
    }
}
