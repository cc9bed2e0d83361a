use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::utils::{parse_bool, parse_seconds};
use super::{ConfigError, SubscriberConfig, TaskManagerConfig};

/// Read `var`, returning `None` when unset or empty
fn read(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn invalid(var: &str, value: String, reason: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var.to_string(),
        value,
        reason: reason.to_string(),
    }
}

fn number<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match read(var) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| invalid(var, value, "expected a number")),
        None => Ok(default),
    }
}

fn seconds(var: &str, default: Duration) -> Result<Duration, ConfigError> {
    match read(var) {
        Some(value) => {
            parse_seconds(&value).ok_or_else(|| invalid(var, value, "expected seconds"))
        }
        None => Ok(default),
    }
}

fn boolean(var: &str, default: bool) -> Result<bool, ConfigError> {
    match read(var) {
        Some(value) => parse_bool(&value).ok_or_else(|| invalid(var, value, "expected a boolean")),
        None => Ok(default),
    }
}

impl SubscriberConfig {
    /// Load subscriber configuration from environment variables
    ///
    /// Unset variables keep their defaults. Also loads from .env file if present
    /// using dotenvy.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the result fails validation
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            num_producers: number("PUBSUB_SUBSCRIBER_NUM_PRODUCERS", defaults.num_producers)?,
            max_messages_per_producer: number(
                "PUBSUB_SUBSCRIBER_MAX_MESSAGES_PER_PRODUCER",
                defaults.max_messages_per_producer,
            )?,
            ack_window: seconds("PUBSUB_SUBSCRIBER_ACK_WINDOW", defaults.ack_window)?,
            ack_deadline_cache_timeout: seconds(
                "PUBSUB_SUBSCRIBER_ACK_DEADLINE_CACHE_TIMEOUT",
                defaults.ack_deadline_cache_timeout,
            )?,
            num_tasks_per_consumer: number(
                "PUBSUB_SUBSCRIBER_NUM_TASKS_PER_CONSUMER",
                defaults.num_tasks_per_consumer,
            )?,
            enable_nack: boolean("PUBSUB_SUBSCRIBER_ENABLE_NACK", defaults.enable_nack)?,
            nack_window: seconds("PUBSUB_SUBSCRIBER_NACK_WINDOW", defaults.nack_window)?,
            pull_timeout: seconds("PUBSUB_SUBSCRIBER_PULL_TIMEOUT", defaults.pull_timeout)?,
            shutdown_timeout: seconds(
                "PUBSUB_SUBSCRIBER_SHUTDOWN_TIMEOUT",
                defaults.shutdown_timeout,
            )?,
        };

        config.validate()?;
        Ok(config)
    }
}

impl TaskManagerConfig {
    /// Load task queue worker configuration from environment variables
    ///
    /// `TASKQUEUE_RETRY_LIMIT` unset means retry forever.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the result fails validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let retry_limit = match read("TASKQUEUE_RETRY_LIMIT") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| invalid("TASKQUEUE_RETRY_LIMIT", value, "expected an integer"))?,
            ),
            None => defaults.retry_limit,
        };

        let config = Self {
            batch_size: number("TASKQUEUE_BATCH_SIZE", defaults.batch_size)?,
            lease_seconds: number("TASKQUEUE_LEASE_SECONDS", defaults.lease_seconds)?,
            retry_limit,
            backoff_base: number("TASKQUEUE_BACKOFF_BASE", defaults.backoff_base)?,
            backoff_factor: number("TASKQUEUE_BACKOFF_FACTOR", defaults.backoff_factor)?,
            backoff_max_value: number("TASKQUEUE_BACKOFF_MAX_VALUE", defaults.backoff_max_value)?,
            max_concurrent_workers: number(
                "TASKQUEUE_MAX_CONCURRENT_WORKERS",
                defaults.max_concurrent_workers,
            )?,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 8] = [
        "PUBSUB_SUBSCRIBER_NUM_PRODUCERS",
        "PUBSUB_SUBSCRIBER_ACK_WINDOW",
        "PUBSUB_SUBSCRIBER_ENABLE_NACK",
        "PUBSUB_SUBSCRIBER_PULL_TIMEOUT",
        "TASKQUEUE_BATCH_SIZE",
        "TASKQUEUE_LEASE_SECONDS",
        "TASKQUEUE_RETRY_LIMIT",
        "TASKQUEUE_BACKOFF_FACTOR",
    ];

    // Helper to clean up environment variables after tests
    fn cleanup_env_vars() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_subscriber_from_env_defaults() {
        cleanup_env_vars();

        let config = SubscriberConfig::from_env().expect("Should load config");
        assert_eq!(config, SubscriberConfig::default());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_subscriber_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PUBSUB_SUBSCRIBER_NUM_PRODUCERS", "3");
            env::set_var("PUBSUB_SUBSCRIBER_ACK_WINDOW", "0.5");
            env::set_var("PUBSUB_SUBSCRIBER_ENABLE_NACK", "no");
            env::set_var("PUBSUB_SUBSCRIBER_PULL_TIMEOUT", "10s");
        }

        let config = SubscriberConfig::from_env().expect("Should load config");
        assert_eq!(config.num_producers, 3);
        assert_eq!(config.ack_window, Duration::from_millis(500));
        assert!(!config.enable_nack);
        assert_eq!(config.pull_timeout, Duration::from_secs(10));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_subscriber_from_env_malformed() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PUBSUB_SUBSCRIBER_ENABLE_NACK", "sometimes");
        }

        let err = SubscriberConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { ref var, .. } if var == "PUBSUB_SUBSCRIBER_ENABLE_NACK"
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_task_manager_from_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TASKQUEUE_BATCH_SIZE", "4");
            env::set_var("TASKQUEUE_LEASE_SECONDS", "30");
            env::set_var("TASKQUEUE_RETRY_LIMIT", "5");
            env::set_var("TASKQUEUE_BACKOFF_FACTOR", "0.5");
        }

        let config = TaskManagerConfig::from_env().expect("Should load config");
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.lease_seconds, 30);
        assert_eq!(config.retry_limit, Some(5));
        assert_eq!(config.backoff_factor, 0.5);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_task_manager_from_env_validates() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TASKQUEUE_BATCH_SIZE", "0");
        }

        assert!(matches!(
            TaskManagerConfig::from_env(),
            Err(ConfigError::Invalid(_))
        ));

        cleanup_env_vars();
    }
}
