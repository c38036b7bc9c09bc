//! # Conductor Configuration System
//!
//! Typed configuration for the orchestration core. Values come from built-in defaults,
//! an optional TOML file and `CONDUCTOR__SECTION__KEY` environment overrides, in that
//! order of precedence (later wins).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let lock_timeout = manager.config().coordination.lock_timeout();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::system;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub coordination: CoordinationConfig,
    pub workflow_engine: WorkflowEngineConfig,
    pub callback: CallbackConfig,
    pub events: EventsConfig,
}

/// Which lock service backs workflow instance coordination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationBackend {
    /// No coordination service; locks always succeed immediately
    #[default]
    None,
    /// In-process named mutexes
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub backend: CoordinationBackend,
    pub lock_timeout_ms: u64,
    /// Attempts made when the backend reports a connection error
    pub connection_retry_attempts: u32,
    pub connection_retry_initial_ms: u64,
    pub connection_retry_max_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: CoordinationBackend::default(),
            lock_timeout_ms: system::DEFAULT_LOCK_TIMEOUT_MS,
            connection_retry_attempts: system::DEFAULT_CONNECTION_RETRY_ATTEMPTS,
            connection_retry_initial_ms: system::DEFAULT_CONNECTION_RETRY_INITIAL_MS,
            connection_retry_max_ms: system::DEFAULT_CONNECTION_RETRY_MAX_MS,
        }
    }
}

impl CoordinationConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn connection_retry_initial(&self) -> Duration {
        Duration::from_millis(self.connection_retry_initial_ms)
    }

    pub fn connection_retry_max(&self) -> Duration {
        Duration::from_millis(self.connection_retry_max_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowEngineConfig {
    /// Write-conflict retries for one completion event before the conflict propagates
    pub max_conflict_retries: u32,
    /// Fan-out concurrency applied when a task does not set its own
    pub default_items_concurrency: Option<usize>,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: system::DEFAULT_MAX_CONFLICT_RETRIES,
            default_items_concurrency: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Exponential multiplier; the n-th retry waits `initial_delay * 2^n`
    pub initial_delay_ms: u64,
    /// Cap on a single wait between attempts
    pub max_delay_ms: u64,
    /// Total time budget across all attempts
    pub max_elapsed_ms: u64,
    /// Optional cap on retries on top of the elapsed budget
    pub max_retries: Option<u32>,
    pub request_timeout_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: system::DEFAULT_CALLBACK_INITIAL_DELAY_MS,
            max_delay_ms: system::DEFAULT_CALLBACK_MAX_DELAY_MS,
            max_elapsed_ms: system::DEFAULT_CALLBACK_MAX_ELAPSED_MS,
            max_retries: None,
            request_timeout_ms: system::DEFAULT_CALLBACK_REQUEST_TIMEOUT_MS,
        }
    }
}

impl CallbackConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: system::DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl ConductorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let coordination = &self.coordination;
        if coordination.lock_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "coordination.lock_timeout_ms",
                0,
                "lock waits must be bounded by a positive timeout",
            ));
        }
        if coordination.connection_retry_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "coordination.connection_retry_attempts",
                0,
                "at least one acquisition attempt is required",
            ));
        }
        if coordination.connection_retry_initial_ms > coordination.connection_retry_max_ms {
            return Err(ConfigurationError::invalid_value(
                "coordination.connection_retry_initial_ms",
                coordination.connection_retry_initial_ms,
                "must not exceed coordination.connection_retry_max_ms",
            ));
        }

        if self.workflow_engine.default_items_concurrency == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "workflow_engine.default_items_concurrency",
                0,
                "concurrency must be greater than 0 when set",
            ));
        }

        let callback = &self.callback;
        if callback.initial_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "callback.initial_delay_ms",
                0,
                "backoff multiplier must be greater than 0",
            ));
        }
        if callback.max_elapsed_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "callback.max_elapsed_ms",
                0,
                "retry budget must be greater than 0",
            ));
        }
        if callback.request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "callback.request_timeout_ms",
                0,
                "request timeout must be greater than 0",
            ));
        }
        if callback.max_delay_ms > callback.max_elapsed_ms {
            return Err(ConfigurationError::invalid_value(
                "callback.max_delay_ms",
                callback.max_delay_ms,
                "must not exceed callback.max_elapsed_ms",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                0,
                "channel capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}
