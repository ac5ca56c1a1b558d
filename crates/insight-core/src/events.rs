//! Notification events and their text-event-stream framing
//!
//! Events form a closed set of variants with typed payloads. Each variant
//! maps to a wire tag (`event:` line) and a JSON object (`data:` line).

use crate::types::{SubscriberId, TaskId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Typed payload of a notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventKind {
    /// First event of every stream
    Connected {
        /// Stream owner
        subscriber_id: SubscriberId,
        /// UNIX seconds
        timestamp: f64,
    },
    /// Keep-alive emitted by an idle stream
    Heartbeat {
        /// UNIX seconds
        timestamp: f64,
    },
    /// Task moved to processing
    TaskStarted {
        /// Task identifier
        task_id: TaskId,
        /// Task kind tag
        task_type: String,
    },
    /// Work reported intermediate progress
    TaskProgress {
        /// Task identifier
        task_id: TaskId,
        /// Task kind tag
        task_type: String,
        /// Stage name (e.g. `extracting_concepts`)
        stage: String,
        /// Percentage, 0..=100
        progress: u8,
    },
    /// Task completed with a result
    TaskCompleted {
        /// Task identifier
        task_id: TaskId,
        /// Task kind tag
        task_type: String,
        /// Work result
        result: serde_json::Value,
        /// Seconds spent processing
        processing_time: f64,
    },
    /// Task failed
    TaskFailed {
        /// Task identifier
        task_id: TaskId,
        /// Task kind tag
        task_type: String,
        /// Error description
        error: String,
    },
}

impl EventKind {
    /// Wire tag of this event
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::Connected { .. } => "connected",
            EventKind::Heartbeat { .. } => "heartbeat",
            EventKind::TaskStarted { .. } => "task_started",
            EventKind::TaskProgress { .. } => "task_progress",
            EventKind::TaskCompleted { .. } => "task_completed",
            EventKind::TaskFailed { .. } => "task_failed",
        }
    }

    /// Task this event refers to, if any
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            EventKind::TaskStarted { task_id, .. }
            | EventKind::TaskProgress { task_id, .. }
            | EventKind::TaskCompleted { task_id, .. }
            | EventKind::TaskFailed { task_id, .. } => Some(*task_id),
            EventKind::Connected { .. } | EventKind::Heartbeat { .. } => None,
        }
    }
}

/// One immutable message destined for a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    kind: EventKind,
    timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Stamp a payload with the current time
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Stream greeting for `subscriber`
    #[must_use]
    pub fn connected(subscriber: SubscriberId) -> Self {
        let now = Utc::now();
        Self {
            kind: EventKind::Connected {
                subscriber_id: subscriber,
                timestamp: unix_seconds(now),
            },
            timestamp: now,
        }
    }

    /// Idle keep-alive
    #[must_use]
    pub fn heartbeat() -> Self {
        let now = Utc::now();
        Self {
            kind: EventKind::Heartbeat {
                timestamp: unix_seconds(now),
            },
            timestamp: now,
        }
    }

    /// Payload
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Emission time
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Wire tag
    #[inline]
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// JSON payload for the `data:` line
    #[must_use]
    pub fn data(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or_default()
    }

    /// Render as a text-event-stream frame
    #[must_use]
    pub fn to_frame(&self) -> SseFrame {
        SseFrame::from(self)
    }
}

/// A rendered `event:`/`data:` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event tag
    pub event: &'static str,
    /// Compact JSON payload (never contains a raw newline)
    pub data: String,
}

impl From<&NotificationEvent> for SseFrame {
    fn from(event: &NotificationEvent) -> Self {
        Self {
            event: event.event_type(),
            data: event.data().to_string(),
        }
    }
}

impl std::fmt::Display for SseFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Seconds since the UNIX epoch with microsecond precision
#[must_use]
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Duration as fractional seconds, for `processing_time`
#[inline]
#[must_use]
pub fn seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}
