//! Application-wide error types using thiserror
//!
//! Adapter failures keep their `ExchangeError` taxonomy inside `Exchange`;
//! everything the manager, scheduler and config layer add on top lives here.

use thiserror::Error;
use crate::adapters::errors::ExchangeError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("Exchange not connected: {0}")]
    ExchangeNotConnected(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True when the underlying exchange error is an authentication failure
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Exchange(e) if e.is_fatal())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_converts() {
        let err: AppError = ExchangeError::Authentication("bad key".into()).into();
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("Exchange error"));

        let err: AppError = ExchangeError::Network("timeout".into()).into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AppError::ExchangeNotFound("okx".into()).to_string(),
            "Exchange not found: okx"
        );
    }
}
