//! Configuration module
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `ExchangeConfig`, `HealthConfig`, `SchedulerConfig`)
//! - YAML loading functionality (`load_config`)
//! - Logging setup and secret redaction (`logging`)
//! - Defaults with environment variable overrides (`constants`)

pub mod constants;
mod loader;
pub mod logging;
mod types;

pub use types::{AppConfig, ExchangeConfig, HealthConfig, SchedulerConfig};

pub use loader::{config_path, load_config, load_config_from_str, CONFIG_PATH_ENV};
