//! Configuration types
//!
//! Everything here is loaded from YAML. Sections other than `exchanges` may be
//! omitted entirely; missing fields fall back to `config::constants`.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::adapters::errors::ExchangeResult;
use crate::adapters::factory::SUPPORTED_EXCHANGES;
use crate::adapters::settings::AdapterSettings;
use crate::adapters::types::Credentials;
use crate::core::templates::TaskTemplate;
use crate::error::AppError;

use super::constants;

fn default_true() -> bool {
    true
}

// ============================================================================
// Exchanges
// ============================================================================

/// One exchange connection; credentials come from `{NAME}_*` env vars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Connect as soon as the exchange is registered
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    /// Force the test environment even if `{NAME}_SANDBOX` is unset
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub settings: AdapterSettings,
}

impl ExchangeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            auto_connect: true,
            sandbox: false,
            settings: AdapterSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !SUPPORTED_EXCHANGES.contains(&self.name.as_str()) {
            return Err(AppError::Config(format!(
                "Exchange '{}' is not supported (expected one of: {})",
                self.name,
                SUPPORTED_EXCHANGES.join(", ")
            )));
        }
        if self.settings.price_precision > 16 || self.settings.amount_precision > 16 {
            return Err(AppError::Config(format!(
                "Exchange '{}': precision must be <= 16 decimal places",
                self.name
            )));
        }
        Ok(())
    }

    /// Credentials from the environment, with the config's sandbox flag applied
    pub fn credentials(&self) -> ExchangeResult<Credentials> {
        let credentials = Credentials::from_env(&self.name)?;
        let sandbox = credentials.sandbox || self.sandbox;
        Ok(credentials.sandbox(sandbox))
    }
}

// ============================================================================
// Health monitoring
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub check_interval_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: constants::health_check_interval().as_secs(),
            reconnect_base_delay_ms: constants::reconnect_base_delay_ms(),
            max_reconnect_attempts: constants::max_reconnect_attempts(),
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Heartbeat age beyond which a connection counts as dead
    pub fn stale_after(&self) -> Duration {
        self.check_interval() * 2
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.check_interval_secs == 0 {
            return Err(AppError::Config("health.check_interval_secs must be > 0".into()));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(AppError::Config("health.reconnect_base_delay_ms must be > 0".into()));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(AppError::Config("health.max_reconnect_attempts must be >= 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub stale_after_execution_secs: u64,
    pub stale_before_first_execution_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stale_after_execution_secs: constants::task_stale_after_execution().as_secs(),
            stale_before_first_execution_secs: constants::task_stale_before_first_execution()
                .as_secs(),
            cleanup_interval_secs: constants::task_cleanup_interval().as_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn stale_after_execution(&self) -> Duration {
        Duration::from_secs(self.stale_after_execution_secs)
    }

    pub fn stale_before_first_execution(&self) -> Duration {
        Duration::from_secs(self.stale_before_first_execution_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Thresholds that `TaskScheduler::cleanup_stale_error` will raise for a
    /// task whose delay can reach `max_interval_secs`
    pub fn raised_thresholds(&self, max_interval_secs: u64) -> Vec<&'static str> {
        let floor = max_interval_secs.saturating_mul(2);
        [
            ("stale_after_execution_secs", self.stale_after_execution_secs),
            ("stale_before_first_execution_secs", self.stale_before_first_execution_secs),
        ]
        .into_iter()
        .filter(|(_, secs)| *secs < floor)
        .map(|(name, _)| name)
        .collect()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.stale_after_execution_secs == 0
            || self.stale_before_first_execution_secs == 0
            || self.cleanup_interval_secs == 0
        {
            return Err(AppError::Config(
                "scheduler thresholds and cleanup interval must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        if self.exchanges.is_empty() {
            return Err(AppError::Config(
                "Configuration must contain at least one exchange".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for exchange in &self.exchanges {
            exchange.validate()?;
            if !names.insert(exchange.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Exchange '{}' is configured more than once",
                    exchange.name
                )));
            }
        }

        self.health.validate()?;
        self.scheduler.validate()?;

        let enabled: HashSet<&str> = self
            .exchanges
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.name.as_str())
            .collect();
        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !task_ids.insert(task.id.as_str()) {
                return Err(AppError::Config(format!("Task id '{}' is not unique", task.id)));
            }
            if let Some(unknown) = task.exchanges.iter().find(|e| !enabled.contains(e.as_str())) {
                return Err(AppError::Config(format!(
                    "Task '{}': exchange '{}' is not configured or not enabled",
                    task.id, unknown
                )));
            }
            for threshold in self.scheduler.raised_thresholds(task.max_interval_secs) {
                warn!(
                    task_id = %task.id,
                    threshold = threshold,
                    max_interval_secs = task.max_interval_secs,
                    "[CONFIG] Stale threshold below twice the task's max interval; it will be raised"
                );
            }
        }

        Ok(())
    }

    pub fn enabled_exchanges(&self) -> impl Iterator<Item = &ExchangeConfig> {
        self.exchanges.iter().filter(|e| e.enabled)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::types::{OrderSide, OrderType};
    use serial_test::serial;

    fn template(id: &str, exchanges: &[&str]) -> TaskTemplate {
        TaskTemplate {
            id: id.to_string(),
            symbol: "BTC/USDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            min_amount: 0.001,
            max_amount: 0.002,
            price: None,
            min_interval_secs: 30,
            max_interval_secs: 60,
            exchanges: exchanges.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn valid_config() -> AppConfig {
        AppConfig {
            exchanges: vec![ExchangeConfig::new("binance"), ExchangeConfig::new("okx")],
            health: HealthConfig::default(),
            scheduler: SchedulerConfig::default(),
            tasks: vec![template("dca", &["binance", "okx"])],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_exchanges_fails() {
        let mut config = valid_config();
        config.exchanges.clear();
        config.tasks.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least one exchange"));
    }

    #[test]
    fn test_unknown_exchange_fails() {
        let mut config = valid_config();
        config.exchanges.push(ExchangeConfig::new("kraken"));
        assert!(config.validate().unwrap_err().to_string().contains("not supported"));
    }

    #[test]
    fn test_duplicate_exchange_fails() {
        let mut config = valid_config();
        config.exchanges.push(ExchangeConfig::new("okx"));
        assert!(config.validate().unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_task_on_disabled_exchange_fails() {
        let mut config = valid_config();
        config.exchanges[1].enabled = false;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'okx' is not configured or not enabled"));
    }

    #[test]
    fn test_duplicate_task_id_fails() {
        let mut config = valid_config();
        config.tasks.push(template("dca", &["binance"]));
        assert!(config.validate().unwrap_err().to_string().contains("not unique"));
    }

    #[test]
    fn test_zero_health_interval_fails() {
        let mut config = valid_config();
        config.health.check_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_after_is_twice_interval() {
        let health = HealthConfig {
            check_interval_secs: 30,
            ..HealthConfig::default()
        };
        assert_eq!(health.stale_after(), Duration::from_secs(60));
    }

    #[test]
    fn test_raised_thresholds_named_per_task_interval() {
        let scheduler = SchedulerConfig {
            stale_after_execution_secs: 300,
            stale_before_first_execution_secs: 120,
            cleanup_interval_secs: 60,
        };
        assert!(scheduler.raised_thresholds(60).is_empty());
        assert_eq!(
            scheduler.raised_thresholds(100),
            vec!["stale_before_first_execution_secs"]
        );
        assert_eq!(scheduler.raised_thresholds(600).len(), 2);

        // Only a warning: the document still loads
        let mut config = valid_config();
        config.scheduler = scheduler;
        config.tasks[0].max_interval_secs = 600;
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial(env)]
    fn test_credentials_sandbox_flag_merges() {
        std::env::set_var("BYBIT_API_KEY", "key");
        std::env::set_var("BYBIT_API_SECRET", "secret");
        std::env::remove_var("BYBIT_SANDBOX");

        let mut exchange = ExchangeConfig::new("bybit");
        assert!(!exchange.credentials().unwrap().sandbox);
        exchange.sandbox = true;
        assert!(exchange.credentials().unwrap().sandbox);

        std::env::remove_var("BYBIT_API_KEY");
        std::env::remove_var("BYBIT_API_SECRET");
        assert!(exchange.credentials().is_err());
    }
}
