//! Testing utilities for the Insight Reader workspace
//!
//! Shared fixtures: services with short timings, stream helpers and canned
//! units of work.

#![allow(missing_docs)]

use futures::StreamExt;
use insight_core::{
    ExecutorConfig, HubConfig, NotificationEvent, NotificationStream, ServiceConfig, TaskError,
    TaskId, TaskService, TaskStatus, WorkResult,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for any single wait in tests
pub const TEST_WAIT: Duration = Duration::from_secs(5);

/// Configuration with production semantics but test-friendly timings
pub fn fast_config() -> ServiceConfig {
    ServiceConfig::new()
        .with_hub(HubConfig::default().with_heartbeat_interval_secs(1))
        .with_executor(
            ExecutorConfig::default()
                .with_task_timeout_secs(Some(5))
                .with_shutdown_grace_secs(1),
        )
}

pub fn test_service() -> Arc<TaskService> {
    Arc::new(TaskService::new(fast_config()))
}

pub fn test_service_with(config: ServiceConfig) -> Arc<TaskService> {
    Arc::new(TaskService::new(config))
}

/// Next event that is not a heartbeat
pub async fn next_event(stream: &mut NotificationStream) -> NotificationEvent {
    tokio::time::timeout(TEST_WAIT, async {
        loop {
            let event = stream.next().await.expect("stream ended");
            if event.event_type() != "heartbeat" {
                return event;
            }
        }
    })
    .await
    .expect("no event within the test wait")
}

/// Next `count` non-heartbeat events
pub async fn collect_events(stream: &mut NotificationStream, count: usize) -> Vec<NotificationEvent> {
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        events.push(next_event(stream).await);
    }
    events
}

/// Wire tags of `events`
pub fn event_types(events: &[NotificationEvent]) -> Vec<&'static str> {
    events.iter().map(NotificationEvent::event_type).collect()
}

/// Poll until the task reaches `status`
pub async fn wait_for_status(service: &TaskService, id: TaskId, status: TaskStatus) {
    tokio::time::timeout(TEST_WAIT, async {
        loop {
            if service.get_task(id).map(|t| t.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "task {id} never reached {status}, last seen {:?}",
            service.get_task(id).map(|t| t.status)
        )
    });
}

/// Poll until the task is completed or failed
pub async fn wait_for_terminal(service: &TaskService, id: TaskId) -> TaskStatus {
    tokio::time::timeout(TEST_WAIT, async {
        loop {
            if let Some(status) = service.get_task(id).map(|t| t.status) {
                if status.is_terminal() {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task never finished")
}

/// Work that returns `value` after `delay`
pub async fn succeed_after(delay: Duration, value: Value) -> WorkResult {
    tokio::time::sleep(delay).await;
    Ok(value)
}

/// Work that fails with `message`
pub async fn fail_with(message: &str) -> WorkResult {
    Err(TaskError::failed(message))
}
