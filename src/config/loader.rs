//! YAML configuration loading

use std::path::{Path, PathBuf};

use crate::error::AppError;

use super::types::AppConfig;

/// Env var naming the config file
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// `$CONFIG_PATH`, or `config.yaml` in the working directory
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Read, parse and validate the YAML file at `path`
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            AppError::Config(format!("Configuration file not found: {}", path.display()))
        }
        _ => AppError::Io(e),
    })?;
    parse(&raw).map_err(|e| match e {
        AppError::Config(msg) => AppError::Config(format!("{} ({})", msg, path.display())),
        other => other,
    })
}

/// Parse and validate YAML held in memory
pub fn load_config_from_str(yaml: &str) -> Result<AppConfig, AppError> {
    parse(yaml)
}

fn parse(yaml: &str) -> Result<AppConfig, AppError> {
    let config: AppConfig = serde_yaml::from_str(yaml)
        .map_err(|e| AppError::Config(format!("YAML parse error: {}", e)))?;
    config.validate()?;
    Ok(config)
}
