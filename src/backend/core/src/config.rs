//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StaffConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Run worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Event log configuration
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Identifier recorded as `runner_id` on claimed runs
    #[serde(default = "default_runner_id")]
    pub runner_id: String,

    /// How often an idle worker polls the queue
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            runner_id: default_runner_id(),
            poll_interval: default_poll_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Page size applied when a query does not specify a limit
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,

    /// Hard cap on requested page sizes
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,

    /// Buffered capacity of the broadcast push stream
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            stream_capacity: default_stream_capacity(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}
fn default_runner_id() -> String {
    format!("staffx-worker-{}", std::process::id())
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_page_size() -> i64 {
    50
}
fn default_max_page_size() -> i64 {
    500
}
fn default_stream_capacity() -> usize {
    1024
}

impl StaffConfig {
    /// Load configuration from environment variables (`STAFFX__` prefix).
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("STAFFX").separator("__"))
            .build()?;

        let cfg: StaffConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("STAFFX").separator("__"))
            .build()?;

        let cfg: StaffConfig = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_defaults() {
        let events = EventsConfig::default();
        assert_eq!(events.default_page_size, 50);
        assert!(events.max_page_size >= events.default_page_size);

        let worker = WorkerConfig::default();
        assert_eq!(worker.poll_interval, Duration::from_secs(1));
        assert!(worker.runner_id.starts_with("staffx-worker-"));
    }
}
