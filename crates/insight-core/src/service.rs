//! Task service
//!
//! The explicitly-constructed entry point handed to request handlers. Owns
//! the registry, hub, executor and work catalog, and runs periodic
//! maintenance until shutdown.

use crate::catalog::{TaskWork, WorkCatalog};
use crate::config::ServiceConfig;
use crate::error::SubmitError;
use crate::executor::{TaskContext, TaskExecutor, WorkResult};
use crate::hub::NotificationHub;
use crate::registry::TaskRegistry;
use crate::stream::NotificationStream;
use crate::types::{SubscriberId, Task, TaskId, TaskMetadata, TaskSnapshot};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// What one maintenance pass cleaned up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaintenanceReport {
    /// Terminal tasks removed from the registry
    pub evicted_tasks: usize,
    /// Subscribers whose expired caches were purged
    pub purged_subscribers: usize,
}

/// Background task execution with live notification delivery
#[derive(Debug)]
pub struct TaskService {
    config: ServiceConfig,
    registry: Arc<TaskRegistry>,
    hub: Arc<NotificationHub>,
    executor: TaskExecutor,
    catalog: WorkCatalog,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl TaskService {
    /// Build a service with the built-in work handlers registered
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let hub = Arc::new(NotificationHub::new(config.hub.clone()));
        let executor = TaskExecutor::new(
            config.executor.clone(),
            Arc::clone(&registry),
            Arc::clone(&hub),
        );

        Self {
            config,
            registry,
            hub,
            executor,
            catalog: WorkCatalog::with_builtins(),
            maintenance: Mutex::new(None),
        }
    }

    /// Service configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Task registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Notification hub
    #[inline]
    #[must_use]
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Task executor
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// Work catalog
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &WorkCatalog {
        &self.catalog
    }

    /// Register a work handler under `kind`
    pub fn register_work(&self, kind: impl Into<String>, work: impl TaskWork + 'static) {
        self.catalog.register(kind, work);
    }

    /// Submit asynchronous work and return its task id immediately
    ///
    /// # Errors
    /// - `SubmitError::ShuttingDown` after [`TaskService::shutdown`]
    pub fn submit_task<F, Fut>(
        &self,
        kind: impl Into<String>,
        metadata: TaskMetadata,
        work: F,
    ) -> Result<TaskId, SubmitError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        self.executor.submit(kind, metadata, work)
    }

    /// Submit blocking work and return its task id immediately
    ///
    /// # Errors
    /// - `SubmitError::ShuttingDown` after [`TaskService::shutdown`]
    pub fn submit_blocking_task<F>(
        &self,
        kind: impl Into<String>,
        metadata: TaskMetadata,
        work: F,
    ) -> Result<TaskId, SubmitError>
    where
        F: FnOnce(TaskContext) -> WorkResult + Send + 'static,
    {
        self.executor.submit_blocking(kind, metadata, work)
    }

    /// Submit the catalog handler registered for `kind` with `input`
    ///
    /// # Errors
    /// - `SubmitError::UnknownKind` if no handler is registered
    /// - `SubmitError::ShuttingDown` after [`TaskService::shutdown`]
    pub fn submit_kind(
        &self,
        kind: &str,
        metadata: TaskMetadata,
        input: Value,
    ) -> Result<TaskId, SubmitError> {
        let Some(work) = self.catalog.get(kind) else {
            tracing::warn!(%kind, "submission for unknown work kind");
            return Err(SubmitError::UnknownKind(kind.to_string()));
        };
        self.executor
            .submit(kind, metadata, move |ctx| async move { work.run(ctx, input).await })
    }

    /// Polling view of a task, `None` if unknown
    #[must_use]
    pub fn get_task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.registry.snapshot(id)
    }

    /// Full task record, `None` if unknown
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    /// Open a live notification stream for `subscriber`
    #[must_use]
    pub fn open_stream(&self, subscriber: SubscriberId) -> NotificationStream {
        NotificationStream::open(Arc::clone(&self.hub), subscriber)
    }

    /// Evict old tasks and expired caches once
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            evicted_tasks: self
                .registry
                .evict_older_than(self.config.executor.task_retention()),
            purged_subscribers: self.hub.sweep_expired(),
        };
        if report != MaintenanceReport::default() {
            tracing::info!(
                evicted_tasks = report.evicted_tasks,
                purged_subscribers = report.purged_subscribers,
                "maintenance pass"
            );
        }
        report
    }

    /// Start the periodic maintenance loop
    ///
    /// The loop holds only a weak reference and ends on its own once the
    /// service is dropped. Calling this again restarts the loop.
    pub fn spawn_maintenance(self: &Arc<Self>) {
        let period = self.config.executor.maintenance_interval();
        let service: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.run_maintenance();
            }
        });

        if let Some(previous) = self.maintenance.lock().replace(handle) {
            previous.abort();
        }
        tracing::debug!(period_secs = period.as_secs(), "maintenance loop started");
    }

    /// Check if the service refuses new work
    #[inline]
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.executor.is_closed()
    }

    /// Stop accepting work, stop maintenance and wait for in-flight tasks
    ///
    /// Returns `true` if every task finished within the configured grace
    /// period.
    pub async fn shutdown(&self) -> bool {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        self.executor
            .shutdown(self.config.executor.shutdown_grace())
            .await
    }

    /// Drop all tasks and subscriber state
    pub fn reset(&self) {
        self.registry.reset();
        self.hub.reset();
        tracing::debug!("service state reset");
    }
}
