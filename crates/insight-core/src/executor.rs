//! Task executor
//!
//! Runs submitted work out-of-band and drives the registry and hub through
//! each task's lifecycle:
//! - `submit` records a pending task and returns its id without waiting
//! - the spawned runner waits for a concurrency slot, marks the task
//!   processing and publishes `task_started`
//! - the work runs in its own tokio task (blocking work on the blocking
//!   pool), bounded by the configured timeout
//! - the outcome is recorded and `task_completed` / `task_failed` published
//!
//! A panicking or hanging unit of work only ever fails its own task.

use crate::config::ExecutorConfig;
use crate::error::{SubmitError, TaskError};
use crate::events::{seconds, EventKind};
use crate::hub::NotificationHub;
use crate::registry::TaskRegistry;
use crate::types::{SubscriberId, TaskId, TaskMetadata};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinError;

/// Outcome type every unit of work produces
pub type WorkResult = Result<Value, TaskError>;

type BoxedWork = Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, WorkResult> + Send>;

/// Handle given to a running unit of work
///
/// Cheap to clone; blocking work may move it onto its own thread.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    kind: Arc<str>,
    metadata: Arc<TaskMetadata>,
    hub: Arc<NotificationHub>,
    /// `true` while the task is processing; closed before the terminal event
    progress_open: Arc<Mutex<bool>>,
}

impl TaskContext {
    /// Task identifier
    #[inline]
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Task kind tag
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Submission metadata
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &TaskMetadata {
        &self.metadata
    }

    /// Owning subscriber, if any
    #[inline]
    #[must_use]
    pub fn subscriber(&self) -> Option<SubscriberId> {
        self.metadata.subscriber
    }

    /// Publish a `task_progress` event for the owning subscriber
    ///
    /// `percent` is clamped to 100. Returns `false` when nothing was
    /// published: the task has no subscriber, or it already reached a
    /// terminal status (e.g. after a timeout).
    pub fn report_progress(&self, stage: impl Into<String>, percent: u32) -> bool {
        let Some(subscriber) = self.subscriber() else {
            return false;
        };
        let open = self.progress_open.lock();
        if !*open {
            return false;
        }

        let stage = stage.into();
        let progress = u8::try_from(percent.min(100)).unwrap_or(100);
        tracing::debug!(task_id = %self.task_id, %stage, progress, "task progress");
        self.hub.publish(
            subscriber,
            EventKind::TaskProgress {
                task_id: self.task_id,
                task_type: self.kind.to_string(),
                stage,
                progress,
            },
        );
        true
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when a runner finishes, however it ends
struct InFlightGuard(Arc<Shared>);

impl InFlightGuard {
    fn enter(shared: &Arc<Shared>) -> Self {
        shared.in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.in_flight.idle.notify_waiters();
        }
    }
}

#[derive(Debug)]
struct Shared {
    config: ExecutorConfig,
    registry: Arc<TaskRegistry>,
    hub: Arc<NotificationHub>,
    permits: Arc<Semaphore>,
    in_flight: InFlight,
    closed: AtomicBool,
}

/// Spawns and supervises units of work
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    shared: Arc<Shared>,
}

impl TaskExecutor {
    /// Create an executor writing to `registry` and publishing through `hub`
    #[must_use]
    pub fn new(
        config: ExecutorConfig,
        registry: Arc<TaskRegistry>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                hub,
                permits,
                in_flight: InFlight::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Executor configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// Submit asynchronous work
    ///
    /// Returns as soon as the pending task is recorded; the work runs later
    /// on the runtime. Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `SubmitError::ShuttingDown` once [`TaskExecutor::shutdown`] started
    pub fn submit<F, Fut>(
        &self,
        kind: impl Into<String>,
        metadata: TaskMetadata,
        work: F,
    ) -> Result<TaskId, SubmitError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        self.spawn(kind.into(), metadata, Box::new(move |ctx| work(ctx).boxed()))
    }

    /// Submit blocking work, run on the blocking thread pool
    ///
    /// # Errors
    /// - `SubmitError::ShuttingDown` once [`TaskExecutor::shutdown`] started
    pub fn submit_blocking<F>(
        &self,
        kind: impl Into<String>,
        metadata: TaskMetadata,
        work: F,
    ) -> Result<TaskId, SubmitError>
    where
        F: FnOnce(TaskContext) -> WorkResult + Send + 'static,
    {
        self.spawn(
            kind.into(),
            metadata,
            Box::new(move |ctx| {
                async move {
                    tokio::task::spawn_blocking(move || work(ctx))
                        .await
                        .unwrap_or_else(|err| Err(join_failure(err)))
                }
                .boxed()
            }),
        )
    }

    fn spawn(
        &self,
        kind: String,
        metadata: TaskMetadata,
        work: BoxedWork,
    ) -> Result<TaskId, SubmitError> {
        // Counted before the closed check: either shutdown sees this runner
        // or this submission sees the executor closed
        let guard = InFlightGuard::enter(&self.shared);
        if self.is_closed() {
            tracing::warn!(%kind, "submission refused, executor shutting down");
            return Err(SubmitError::ShuttingDown);
        }

        let subscriber = metadata.subscriber;
        let id = self.shared.registry.create(kind.clone(), metadata);
        tracing::info!(task_id = %id, %kind, subscriber = ?subscriber, "task submitted");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let _guard = guard;
            run(shared, id, work).await;
        });

        Ok(id)
    }

    /// Check if submissions are refused
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Submitted tasks whose runner has not finished yet
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.count.load(Ordering::SeqCst)
    }

    /// Stop accepting work and wait up to `grace` for in-flight tasks
    ///
    /// Returns `true` if every task finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(in_flight = self.in_flight(), "executor shutting down");
        }

        let drained = tokio::time::timeout(grace, self.wait_idle()).await.is_ok();
        if drained {
            tracing::info!("all tasks finished");
        } else {
            tracing::warn!(
                in_flight = self.in_flight(),
                grace_secs = grace.as_secs(),
                "grace period elapsed with tasks still running"
            );
        }
        drained
    }

    /// Wait until no runner is in flight
    pub async fn wait_idle(&self) {
        let in_flight = &self.shared.in_flight;
        loop {
            let notified = in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn run(shared: Arc<Shared>, id: TaskId, work: BoxedWork) {
    // The semaphore is never closed, so acquisition only fails if it were
    let _permit = Arc::clone(&shared.permits).acquire_owned().await.ok();

    let Ok(task) = shared.registry.mark_processing(id) else {
        // Evicted or reset while waiting for a slot
        return;
    };
    let kind: Arc<str> = Arc::from(task.kind.as_str());
    let subscriber = task.subscriber();
    tracing::info!(task_id = %id, kind = %kind, "task started");

    if let Some(subscriber) = subscriber {
        shared.hub.publish(
            subscriber,
            EventKind::TaskStarted {
                task_id: id,
                task_type: kind.to_string(),
            },
        );
    }

    let progress_open = Arc::new(Mutex::new(true));
    let ctx = TaskContext {
        task_id: id,
        kind: Arc::clone(&kind),
        metadata: Arc::new(task.metadata),
        hub: Arc::clone(&shared.hub),
        progress_open: Arc::clone(&progress_open),
    };

    let mut handle = tokio::spawn(work(ctx));
    let outcome = match shared.config.task_timeout() {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined.unwrap_or_else(|err| Err(join_failure(err))),
            Err(_) => {
                handle.abort();
                Err(TaskError::Timeout {
                    secs: limit.as_secs(),
                })
            }
        },
        None => handle.await.unwrap_or_else(|err| Err(join_failure(err))),
    };

    // Holding the gate orders any in-flight progress report before the
    // terminal event and silences later ones.
    let mut open = progress_open.lock();
    *open = false;
    finish(&shared, id, &kind, subscriber, outcome);
}

fn finish(
    shared: &Shared,
    id: TaskId,
    kind: &str,
    subscriber: Option<SubscriberId>,
    outcome: WorkResult,
) {
    match outcome {
        Ok(result) => {
            let Ok(task) = shared.registry.mark_completed(id, result.clone()) else {
                return;
            };
            let processing_time = seconds(task.processing_time().unwrap_or_default());
            tracing::info!(task_id = %id, %kind, processing_time, "task completed");
            if let Some(subscriber) = subscriber {
                shared.hub.publish(
                    subscriber,
                    EventKind::TaskCompleted {
                        task_id: id,
                        task_type: kind.to_string(),
                        result,
                        processing_time,
                    },
                );
            }
        }
        Err(err) => {
            let error = err.to_string();
            tracing::error!(task_id = %id, %kind, error = %error, "task failed");
            if shared.registry.mark_failed(id, error.clone()).is_err() {
                return;
            }
            if let Some(subscriber) = subscriber {
                shared.hub.publish(
                    subscriber,
                    EventKind::TaskFailed {
                        task_id: id,
                        task_type: kind.to_string(),
                        error,
                    },
                );
            }
        }
    }
}

fn join_failure(err: JoinError) -> TaskError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        TaskError::Panicked(message)
    } else {
        TaskError::failed("task was cancelled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::types::TaskStatus;
    use serde_json::json;

    fn executor(config: ExecutorConfig) -> (TaskExecutor, Arc<TaskRegistry>, Arc<NotificationHub>) {
        let registry = Arc::new(TaskRegistry::new());
        let hub = Arc::new(NotificationHub::new(HubConfig::default()));
        let executor = TaskExecutor::new(config, Arc::clone(&registry), Arc::clone(&hub));
        (executor, registry, hub)
    }

    #[tokio::test]
    async fn submit_returns_before_work_finishes() {
        let (executor, registry, _hub) = executor(ExecutorConfig::default());
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let id = executor
            .submit("slow", TaskMetadata::new(), |_ctx| async move {
                let _ = gate.await;
                Ok(json!("done"))
            })
            .unwrap();

        assert!(!registry.status(id).unwrap().is_terminal());
        release.send(()).unwrap();
        executor.wait_idle().await;
        assert_eq!(registry.status(id), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn work_error_fails_task() {
        let (executor, registry, _hub) = executor(ExecutorConfig::default());
        let id = executor
            .submit("broken", TaskMetadata::new(), |_ctx| async {
                Err(TaskError::failed("model unavailable"))
            })
            .unwrap();

        executor.wait_idle().await;
        let task = registry.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("model unavailable"));
        assert!(task.result.is_none());
    }

    fn explode() -> WorkResult {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn panic_is_captured_as_failure() {
        let (executor, registry, _hub) = executor(ExecutorConfig::default());
        let id = executor
            .submit("panicky", TaskMetadata::new(), |_ctx| async { explode() })
            .unwrap();

        executor.wait_idle().await;
        let task = registry.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("task panicked: kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_work_times_out() {
        let config = ExecutorConfig::default().with_task_timeout_secs(Some(2));
        let (executor, registry, _hub) = executor(config);
        let id = executor
            .submit("hang", TaskMetadata::new(), |_ctx| async {
                futures::future::pending::<()>().await;
                Ok(Value::Null)
            })
            .unwrap();

        executor.wait_idle().await;
        let task = registry.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("task timed out after 2s"));
    }

    #[tokio::test]
    async fn blocking_work_runs_off_runtime() {
        let (executor, registry, _hub) = executor(ExecutorConfig::default());
        let id = executor
            .submit_blocking("cpu", TaskMetadata::new(), |_ctx| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(json!(42))
            })
            .unwrap();

        executor.wait_idle().await;
        assert_eq!(registry.get(id).unwrap().result, Some(json!(42)));
    }

    #[tokio::test]
    async fn closed_executor_refuses_work() {
        let (executor, registry, _hub) = executor(ExecutorConfig::default());
        assert!(executor.shutdown(Duration::from_millis(10)).await);

        let err = executor
            .submit("late", TaskMetadata::new(), |_ctx| async { Ok(Value::Null) })
            .unwrap_err();
        assert_eq!(err, SubmitError::ShuttingDown);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_waits_for_submissions_racing_it() {
        let (executor, registry, _hub) = executor(ExecutorConfig::default());
        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let executor = executor.clone();
                tokio::spawn(async move {
                    let mut accepted = Vec::new();
                    while let Ok(id) = executor.submit("racer", TaskMetadata::new(), |_ctx| async {
                        tokio::task::yield_now().await;
                        Ok(Value::Null)
                    }) {
                        accepted.push(id);
                        tokio::task::yield_now().await;
                    }
                    accepted
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.shutdown(Duration::from_secs(5)).await);

        // Every accepted task finished before shutdown reported drained
        for submitter in submitters {
            for id in submitter.await.unwrap() {
                assert!(registry.status(id).unwrap().is_terminal());
            }
        }
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn progress_is_silenced_after_terminal_state() {
        let (executor, _registry, hub) = executor(ExecutorConfig::default());
        let (ctx_tx, ctx_rx) = tokio::sync::oneshot::channel();
        executor
            .submit("leaky", TaskMetadata::for_subscriber(5u64), move |ctx| async move {
                let _ = ctx_tx.send(ctx);
                Ok(Value::Null)
            })
            .unwrap();

        let ctx: TaskContext = ctx_rx.await.unwrap();
        executor.wait_idle().await;

        assert!(!ctx.report_progress("too late", 50));
        // started + completed only
        assert_eq!(hub.cached_len(SubscriberId(5)), 2);
    }

    #[test]
    fn join_failure_reads_string_panics() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let err = runtime
            .block_on(runtime.spawn(async { panic!("{}", String::from("owned")) }))
            .unwrap_err();
        assert_eq!(join_failure(err).to_string(), "task panicked: owned");
    }
}
