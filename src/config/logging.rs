//! Logging setup and secret redaction
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | `info` | Level filter (standard tracing syntax) |
//! | `LOG_FORMAT` | `json` | `json` or `pretty` |
//!
//! ```rust,ignore
//! use perp_desk::config::logging::{init_logging, SanitizedValue};
//!
//! init_logging();
//! tracing::info!(api_key = %SanitizedValue::new(&key), "Connecting");
//! ```

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt as ts_fmt, prelude::*, EnvFilter};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Wrapper for secrets in log fields
///
/// Values longer than 8 chars keep their first 4 chars, anything shorter is
/// fully redacted. `Debug` never shows any part of the value.
#[derive(Clone)]
pub struct SanitizedValue<'a>(&'a str);

impl<'a> SanitizedValue<'a> {
    pub fn new(value: &'a str) -> Self {
        Self(value)
    }
}

impl fmt::Display for SanitizedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.chars().count() > 8 {
            let prefix: String = self.0.chars().take(4).collect();
            write!(f, "{}...REDACTED", prefix)
        } else {
            write!(f, "REDACTED")
        }
    }
}

impl fmt::Debug for SanitizedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SanitizedValue(***)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level_filter: String,
    pub use_pretty_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level_filter: DEFAULT_LOG_LEVEL.to_string(),
            use_pretty_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level_filter: env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
            use_pretty_format: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("pretty"))
                .unwrap_or(false),
        }
    }
}

/// Initialize the global subscriber from `RUST_LOG` / `LOG_FORMAT`
///
/// Subsequent calls are no-ops.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::from_env());
}

pub fn init_logging_with_config(config: LoggingConfig) {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let env_filter =
        EnvFilter::try_new(&config.level_filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if config.use_pretty_format {
        tracing_subscriber::registry()
            .with(ts_fmt::layer().pretty().with_target(true))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                ts_fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true),
            )
            .with(env_filter)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_sanitized_value_long_string() {
        assert_eq!(SanitizedValue::new("sk-1234567890abcdef").to_string(), "sk-1...REDACTED");
    }

    #[test]
    fn test_sanitized_value_boundaries() {
        assert_eq!(SanitizedValue::new("").to_string(), "REDACTED");
        assert_eq!(SanitizedValue::new("12345678").to_string(), "REDACTED");
        assert_eq!(SanitizedValue::new("123456789").to_string(), "1234...REDACTED");
    }

    #[test]
    fn test_sanitized_value_multibyte() {
        assert_eq!(SanitizedValue::new("clé-secrète-éé").to_string(), "clé-...REDACTED");
    }

    #[test]
    fn test_sanitized_value_debug() {
        assert_eq!(format!("{:?}", SanitizedValue::new("secret-value")), "SanitizedValue(***)");
    }

    #[test]
    #[serial(env)]
    fn test_logging_config_from_env() {
        std::env::set_var("LOG_FORMAT", "PRETTY");
        std::env::set_var("RUST_LOG", "perp_desk=debug");
        let config = LoggingConfig::from_env();
        assert!(config.use_pretty_format);
        assert_eq!(config.level_filter, "perp_desk=debug");

        std::env::remove_var("LOG_FORMAT");
        std::env::remove_var("RUST_LOG");
        assert_eq!(LoggingConfig::from_env(), LoggingConfig::default());
    }
}
