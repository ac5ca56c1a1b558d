//! Insight Core - background tasks with live notifications
//!
//! Decouples request handling from long-running work:
//! - Submits work and returns a task id immediately
//! - Tracks each task through `pending -> processing -> completed | failed`
//! - Publishes lifecycle events to the owning subscriber's live streams
//! - Caches events for disconnected subscribers and replays them on reconnect
//!
//! # Example
//!
//! ```rust,ignore
//! use insight_core::prelude::*;
//! use futures::StreamExt;
//!
//! # async fn example() {
//! let service = TaskService::new(ServiceConfig::default());
//! let subscriber = SubscriberId(42);
//!
//! let task_id = service
//!     .submit_task("insight", TaskMetadata::for_subscriber(subscriber), |_ctx| async {
//!         Ok(serde_json::json!("ok"))
//!     })
//!     .unwrap();
//!
//! let mut stream = service.open_stream(subscriber);
//! while let Some(event) = stream.next().await {
//!     print!("{}", event.to_frame());
//! }
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod hub;
pub mod logging;
pub mod registry;
pub mod service;
pub mod stream;
pub mod types;

pub use cache::{DrainOutcome, MessageCache};
pub use catalog::{EchoWork, TaskWork, WorkCatalog};
pub use channel::{event_channel, ChannelId, Delivery, EventReceiver, EventSender, RecvOutcome};
pub use config::{ExecutorConfig, HubConfig, LoggingConfig, ServerConfig, ServiceConfig};
pub use error::{ConfigError, RegistryError, SubmitError, TaskError};
pub use events::{EventKind, NotificationEvent, SseFrame};
pub use executor::{TaskContext, TaskExecutor, WorkResult};
pub use hub::{HubStats, NotificationHub, PublishOutcome};
pub use registry::TaskRegistry;
pub use service::{MaintenanceReport, TaskService};
pub use stream::NotificationStream;
pub use types::{SubscriberId, Task, TaskId, TaskMetadata, TaskSnapshot, TaskStatus};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Insight Core
    pub use crate::{
        EventKind, NotificationEvent, ServiceConfig, SubmitError, SubscriberId, TaskContext,
        TaskError, TaskId, TaskMetadata, TaskService, TaskSnapshot, TaskStatus, TaskWork,
        WorkResult,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
