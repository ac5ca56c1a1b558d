//! Service configuration
//!
//! All sections default to production values and can be overridden from a
//! TOML file. Durations are stored in whole seconds.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Notification hub settings
    pub hub: HubConfig,
    /// Task executor settings
    pub executor: ExecutorConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// HTTP surface settings
    pub server: ServerConfig,
}

impl ServiceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// With hub section
    #[inline]
    #[must_use]
    pub fn with_hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }

    /// With executor section
    #[inline]
    #[must_use]
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Reject values the runtime cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.hub.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "hub.heartbeat_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.executor.max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.executor.task_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "executor.task_timeout_secs must be positive or omitted".to_string(),
            ));
        }
        if self.executor.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "executor.maintenance_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Notification hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capacity of each live channel
    pub channel_capacity: usize,
    /// Maximum cached events per subscriber
    pub max_cache_size: usize,
    /// How long a disconnected subscriber's cache survives
    pub cache_retention_secs: u64,
    /// Idle wait before the stream emits a heartbeat
    pub heartbeat_interval_secs: u64,
}

impl HubConfig {
    /// Cache retention window
    #[inline]
    #[must_use]
    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.cache_retention_secs)
    }

    /// Heartbeat interval
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// With max cache size
    #[inline]
    #[must_use]
    pub fn with_max_cache_size(mut self, size: usize) -> Self {
        self.max_cache_size = size;
        self
    }

    /// With channel capacity
    #[inline]
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// With cache retention
    #[inline]
    #[must_use]
    pub fn with_cache_retention_secs(mut self, secs: u64) -> Self {
        self.cache_retention_secs = secs;
        self
    }

    /// With heartbeat interval
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            max_cache_size: 50,
            cache_retention_secs: 300,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Task executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Tasks allowed to run at once; the rest wait as pending
    pub max_concurrent_tasks: usize,
    /// Maximum work duration before the task is force-failed
    pub task_timeout_secs: Option<u64>,
    /// Age after which terminal tasks are evicted
    pub task_retention_secs: u64,
    /// Period of the maintenance loop
    pub maintenance_interval_secs: u64,
    /// How long shutdown waits for in-flight tasks
    pub shutdown_grace_secs: u64,
}

impl ExecutorConfig {
    /// Work timeout, if enabled
    #[inline]
    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Terminal task retention
    #[inline]
    #[must_use]
    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    /// Maintenance period
    #[inline]
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Shutdown grace period
    #[inline]
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// With max concurrent tasks
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// With work timeout (`None` disables it)
    #[inline]
    #[must_use]
    pub fn with_task_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.task_timeout_secs = secs;
        self
    }

    /// With shutdown grace period
    #[inline]
    #[must_use]
    pub fn with_shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 16,
            task_timeout_secs: Some(300),
            task_retention_secs: 24 * 60 * 60,
            maintenance_interval_secs: 600,
            shutdown_grace_secs: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// HTTP surface configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Static bearer tokens mapped to subscriber ids
    pub tokens: BTreeMap<String, u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            tokens: BTreeMap::new(),
        }
    }
}
