//! Runtime configuration for the subscriber and the task queue worker
//!
//! Both configurations have defaults matching the behaviour of the managed
//! client libraries and can be overridden from environment variables (with
//! `.env` support through dotenvy).
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use gcloud_aio::config::{SubscriberConfig, TaskManagerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let subscriber = SubscriberConfig::from_env()?;
//! let worker = TaskManagerConfig::from_env()?;
//!
//! println!("{} producers, lease {}s", subscriber.num_producers, worker.lease_seconds);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

mod env;
mod utils;
mod validation;

pub use utils::{parse_bool, parse_seconds};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    /// A setting is out of its valid range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Pub/Sub subscriber tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberConfig {
    /// Number of producer/consumer pairs
    pub num_producers: usize,
    /// `maxMessages` per pull; also the capacity of each message queue
    pub max_messages_per_producer: usize,
    /// Time budget for collecting one acknowledge batch
    pub ack_window: Duration,
    /// How long a fetched subscription ack deadline is trusted
    pub ack_deadline_cache_timeout: Duration,
    /// Concurrent handler tasks per consumer
    pub num_tasks_per_consumer: usize,
    /// Route handler failures to an immediate redelivery
    pub enable_nack: bool,
    /// Time budget for collecting one nack batch
    pub nack_window: Duration,
    /// Long-poll timeout of a pull request
    pub pull_timeout: Duration,
    /// Upper bound for draining in-flight work on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            num_producers: 1,
            max_messages_per_producer: 100,
            ack_window: Duration::from_millis(300),
            ack_deadline_cache_timeout: Duration::from_secs(60),
            num_tasks_per_consumer: 1,
            enable_nack: true,
            nack_window: Duration::from_millis(300),
            pull_timeout: Duration::from_secs(25),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SubscriberConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_subscriber(self)
    }
}

/// Task queue worker tuning
#[derive(Debug, Clone, PartialEq)]
pub struct TaskManagerConfig {
    /// Tasks leased per cycle
    pub batch_size: u32,
    /// Lease duration requested (and renewed) for each task
    pub lease_seconds: u64,
    /// Attempts after which a retryable failure is dead-lettered; `None` retries forever
    pub retry_limit: Option<u32>,
    pub backoff_base: f64,
    pub backoff_factor: f64,
    pub backoff_max_value: f64,
    /// Size of the blocking worker pool
    pub max_concurrent_workers: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            lease_seconds: 60,
            retry_limit: None,
            backoff_base: 2.0,
            backoff_factor: 1.1,
            backoff_max_value: 60.0,
            max_concurrent_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl TaskManagerConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate_task_manager(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_defaults() {
        let config = SubscriberConfig::default();
        assert_eq!(config.num_producers, 1);
        assert_eq!(config.max_messages_per_producer, 100);
        assert_eq!(config.ack_window, Duration::from_millis(300));
        assert_eq!(config.ack_deadline_cache_timeout, Duration::from_secs(60));
        assert_eq!(config.num_tasks_per_consumer, 1);
        assert!(config.enable_nack);
        assert_eq!(config.pull_timeout, Duration::from_secs(25));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_task_manager_defaults() {
        let config = TaskManagerConfig::default();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.lease_seconds, 60);
        assert_eq!(config.retry_limit, None);
        assert_eq!(config.backoff_factor, 1.1);
        assert_eq!(config.backoff_max_value, 60.0);
        assert!(config.max_concurrent_workers >= 1);
        assert_eq!(config.lease_duration(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidEnv {
            var: "TASKQUEUE_LEASE_SECONDS".to_string(),
            value: "forever".to_string(),
            reason: "expected an integer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value 'forever' for TASKQUEUE_LEASE_SECONDS: expected an integer"
        );
    }
}
