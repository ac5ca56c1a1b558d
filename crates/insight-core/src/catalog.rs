//! Named work handlers
//!
//! Request handlers submit work by kind; the catalog maps each kind to the
//! handler that runs it with the request's JSON input.

use crate::error::TaskError;
use crate::executor::{TaskContext, WorkResult};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A unit of work that can be submitted by kind
#[async_trait::async_trait]
pub trait TaskWork: Send + Sync {
    /// Run once for a submitted task
    ///
    /// The returned value becomes the task result; an error fails the task
    /// with its `Display` text.
    async fn run(&self, ctx: TaskContext, input: Value) -> WorkResult;
}

/// Registry of work handlers keyed by kind
#[derive(Default)]
pub struct WorkCatalog {
    handlers: DashMap<String, Arc<dyn TaskWork>>,
}

impl std::fmt::Debug for WorkCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkCatalog")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl WorkCatalog {
    /// Create an empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in `echo` handler
    #[must_use]
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        catalog.register(EchoWork::KIND, EchoWork);
        catalog
    }

    /// Register `work` under `kind`, replacing any previous handler
    pub fn register(&self, kind: impl Into<String>, work: impl TaskWork + 'static) {
        self.register_arc(kind, Arc::new(work));
    }

    /// Register a shared handler
    pub fn register_arc(&self, kind: impl Into<String>, work: Arc<dyn TaskWork>) {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), work).is_some() {
            tracing::warn!(%kind, "replaced work handler");
        } else {
            tracing::debug!(%kind, "registered work handler");
        }
    }

    /// Handler for `kind`
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskWork>> {
        self.handlers.get(kind).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if `kind` has a handler
    #[inline]
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EchoInput {
    delay_ms: u64,
    fail: Option<String>,
}

/// Returns its input unchanged
///
/// Recognized input fields:
/// - `delay_ms`: sleep before answering, reporting progress halfway
/// - `fail`: fail the task with this message instead
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoWork;

impl EchoWork {
    /// Kind under which the handler is registered by default
    pub const KIND: &'static str = "echo";
}

#[async_trait::async_trait]
impl TaskWork for EchoWork {
    async fn run(&self, ctx: TaskContext, input: Value) -> WorkResult {
        let options: EchoInput = if input.is_object() {
            serde_json::from_value(input.clone())
                .map_err(|err| TaskError::InvalidInput(err.to_string()))?
        } else {
            EchoInput::default()
        };

        if options.delay_ms > 0 {
            let half = Duration::from_millis(options.delay_ms / 2);
            tokio::time::sleep(half).await;
            ctx.report_progress("echoing", 50);
            tokio::time::sleep(Duration::from_millis(options.delay_ms) - half).await;
        }

        match options.fail {
            Some(message) => Err(TaskError::Failed(message)),
            None => Ok(input),
        }
    }
}
