use super::{ConfigError, SubscriberConfig, TaskManagerConfig};
use crate::core::backoff::check_params;

/// Largest `maxTasks` Cloud Tasks accepts for one lease call
pub const MAX_LEASE_BATCH: u32 = 1000;

/// Largest lease Cloud Tasks grants for pull tasks (one week)
pub const MAX_LEASE_SECONDS: u64 = 7 * 24 * 60 * 60;

fn require_positive(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
    }
    Ok(())
}

/// Validate subscriber settings
///
/// Counts must be at least one and the batching windows must be non-zero,
/// otherwise the batchers would spin.
pub fn validate_subscriber(config: &SubscriberConfig) -> Result<(), ConfigError> {
    require_positive("num_producers", config.num_producers)?;
    require_positive("max_messages_per_producer", config.max_messages_per_producer)?;
    require_positive("num_tasks_per_consumer", config.num_tasks_per_consumer)?;

    if config.ack_window.is_zero() {
        return Err(ConfigError::Invalid("ack_window must be positive".into()));
    }
    if config.enable_nack && config.nack_window.is_zero() {
        return Err(ConfigError::Invalid("nack_window must be positive".into()));
    }
    if config.pull_timeout.is_zero() {
        return Err(ConfigError::Invalid("pull_timeout must be positive".into()));
    }

    Ok(())
}

/// Validate task queue worker settings
pub fn validate_task_manager(config: &TaskManagerConfig) -> Result<(), ConfigError> {
    if config.batch_size == 0 || config.batch_size > MAX_LEASE_BATCH {
        return Err(ConfigError::Invalid(format!(
            "batch_size must be between 1 and {MAX_LEASE_BATCH}, got {}",
            config.batch_size
        )));
    }

    // Renewal fires at half the lease, so one second would renew continuously
    if config.lease_seconds < 2 || config.lease_seconds > MAX_LEASE_SECONDS {
        return Err(ConfigError::Invalid(format!(
            "lease_seconds must be between 2 and {MAX_LEASE_SECONDS}, got {}",
            config.lease_seconds
        )));
    }

    require_positive("max_concurrent_workers", config.max_concurrent_workers)?;

    check_params(
        config.backoff_base,
        config.backoff_factor,
        config.backoff_max_value,
    )
    .map_err(ConfigError::Invalid)?;

    Ok(())
}
