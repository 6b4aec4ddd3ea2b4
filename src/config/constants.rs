//! Defaults with environment-variable overrides
//!
//! The YAML config wins over these when a field is present; these only fill
//! in what the file leaves out.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Connection health
// =============================================================================

/// Health check interval (default: 30 seconds)
///
/// Environment variable: `HEALTH_CHECK_INTERVAL_SECS`
pub fn health_check_interval() -> Duration {
    Duration::from_secs(env_or("HEALTH_CHECK_INTERVAL_SECS", 30))
}

/// Base delay of the exponential reconnect backoff (default: 1000ms)
///
/// Environment variable: `RECONNECT_BASE_DELAY_MS`
pub fn reconnect_base_delay_ms() -> u64 {
    env_or("RECONNECT_BASE_DELAY_MS", 1_000)
}

/// Reconnect attempts before giving up (default: 5)
///
/// Environment variable: `MAX_RECONNECT_ATTEMPTS`
pub fn max_reconnect_attempts() -> u32 {
    env_or("MAX_RECONNECT_ATTEMPTS", 5)
}

// =============================================================================
// Scheduler
// =============================================================================

/// A task whose last run is older than this is stale (default: 5 minutes)
///
/// Environment variable: `TASK_STALE_AFTER_EXECUTION_SECS`
pub fn task_stale_after_execution() -> Duration {
    Duration::from_secs(env_or("TASK_STALE_AFTER_EXECUTION_SECS", 300))
}

/// A task that never ran and started longer ago than this is stale (default: 2 minutes)
///
/// Environment variable: `TASK_STALE_BEFORE_FIRST_EXECUTION_SECS`
pub fn task_stale_before_first_execution() -> Duration {
    Duration::from_secs(env_or("TASK_STALE_BEFORE_FIRST_EXECUTION_SECS", 120))
}

/// Period of the stale-task sweep (default: 60 seconds)
///
/// Environment variable: `TASK_CLEANUP_INTERVAL_SECS`
pub fn task_cleanup_interval() -> Duration {
    Duration::from_secs(env_or("TASK_CLEANUP_INTERVAL_SECS", 60))
}

/// Print the effective defaults at startup
pub fn log_configuration() {
    tracing::info!(
        health_check_interval = ?health_check_interval(),
        reconnect_base_delay_ms = reconnect_base_delay_ms(),
        max_reconnect_attempts = max_reconnect_attempts(),
        task_stale_after_execution = ?task_stale_after_execution(),
        task_stale_before_first_execution = ?task_stale_before_first_execution(),
        task_cleanup_interval = ?task_cleanup_interval(),
        "Configuration defaults"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(env)]
    fn test_default_values() {
        assert_eq!(health_check_interval(), Duration::from_secs(30));
        assert_eq!(reconnect_base_delay_ms(), 1_000);
        assert_eq!(max_reconnect_attempts(), 5);
        assert_eq!(task_stale_after_execution(), Duration::from_secs(300));
        assert_eq!(task_stale_before_first_execution(), Duration::from_secs(120));
    }

    #[test]
    #[serial(env)]
    fn test_env_override() {
        std::env::set_var("MAX_RECONNECT_ATTEMPTS", "8");
        assert_eq!(max_reconnect_attempts(), 8);

        std::env::set_var("MAX_RECONNECT_ATTEMPTS", "not-a-number");
        assert_eq!(max_reconnect_attempts(), 5);

        std::env::remove_var("MAX_RECONNECT_ATTEMPTS");
    }
}
