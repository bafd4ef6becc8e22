//! Framework configuration parsing, validation, and derived pool sizing.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::{Result, UplinkError};

fn default_retry_interval() -> u64 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_failure_threshold() -> u32 {
    3
}

fn default_shutdown_grace() -> u64 {
    10
}

/// Framework configuration parsed from TOML.
///
/// All intervals are plain seconds so the file stays readable; accessors
/// expose [`Duration`] values for the runtime.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct UplinkConfig {
    /// Orchestrator address handed to the transport's connect call.
    pub endpoint: String,
    /// Fixed delay between connection attempts.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u64,
    /// Delay between heartbeat sweeps across all handlers.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Consecutive per-handler heartbeat failures that force a reconnect.
    #[serde(default = "default_heartbeat_failure_threshold")]
    pub heartbeat_failure_threshold: u32,
    /// Dispatcher worker count; 0 means one per available processor.
    #[serde(default)]
    pub worker_threads: usize,
    /// How long `stop()` waits for queued work before abandoning it.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl UplinkConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| UplinkError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `UplinkError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Fixed delay between connection attempts.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }

    /// Delay between heartbeat sweeps.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Grace period granted to in-flight work during shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Effective dispatcher worker count.
    ///
    /// A configured value of 0 resolves to the number of available
    /// processors (minimum 1 when that cannot be determined).
    #[must_use]
    pub fn max_pool_size(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        }
    }

    /// Core pool size: `max(1, max_pool_size / 2 + 1)`.
    #[must_use]
    pub fn core_pool_size(&self) -> usize {
        (self.max_pool_size() / 2 + 1).max(1)
    }

    /// Work-queue capacity; matches the core pool size so a full queue
    /// back-pressures the stream-reading task instead of dropping work.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.core_pool_size()
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(UplinkError::Config("endpoint must not be empty".into()));
        }

        if self.retry_interval_seconds == 0 {
            return Err(UplinkError::Config(
                "retry_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(UplinkError::Config(
                "heartbeat_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.heartbeat_failure_threshold == 0 {
            return Err(UplinkError::Config(
                "heartbeat_failure_threshold must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
