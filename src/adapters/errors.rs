//! Exchange adapter error types
//!
//! Every exchange-native failure (HTTP status, JSON error code, socket error)
//! is mapped exactly once into `ExchangeError`. Callers of an adapter never see
//! exchange-specific codes, only this taxonomy.

use thiserror::Error;

/// Normalized error taxonomy shared by all adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    /// Transport failure, timeout or exchange-side outage (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Rejected credentials or signature (fatal for the connection)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Not enough margin / balance for the requested operation
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Order parameters rejected locally or by the exchange
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Order id unknown to the exchange
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Request weight or order rate exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Payload could not be decoded into the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Operation requires a live session
    #[error("Not connected to {0}")]
    NotConnected(String),
}

impl ExchangeError {
    /// Whether the manager's reconnect loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_)
                | ExchangeError::InvalidResponse(_)
                | ExchangeError::NotConnected(_)
        )
    }

    /// Whether this error halts automatic reconnection for the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Authentication(_))
    }

    /// Short machine-friendly kind label used in structured logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeError::Network(_) => "network",
            ExchangeError::Authentication(_) => "authentication",
            ExchangeError::InsufficientFunds(_) => "insufficient_funds",
            ExchangeError::InvalidOrder(_) => "invalid_order",
            ExchangeError::OrderNotFound(_) => "order_not_found",
            ExchangeError::RateLimitExceeded(_) => "rate_limit_exceeded",
            ExchangeError::InvalidResponse(_) => "invalid_response",
            ExchangeError::NotConnected(_) => "not_connected",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::Network(format!("WebSocket error: {}", e))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExchangeError::Network(format!("Request timed out: {}", e))
        } else if e.is_decode() {
            ExchangeError::InvalidResponse(e.to_string())
        } else {
            ExchangeError::Network(e.to_string())
        }
    }
}

/// Result type alias for exchange operations
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_display() {
        let err = ExchangeError::Network("timeout".to_string());
        assert_eq!(err.to_string(), "Network error: timeout");
    }

    #[test]
    fn test_authentication_display() {
        let err = ExchangeError::Authentication("bad signature".to_string());
        assert_eq!(err.to_string(), "Authentication failed: bad signature");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ExchangeError::Network("x".into()).is_retryable());
        assert!(ExchangeError::NotConnected("okx".into()).is_retryable());
        assert!(!ExchangeError::Authentication("x".into()).is_retryable());
        assert!(!ExchangeError::InsufficientFunds("x".into()).is_retryable());
        assert!(!ExchangeError::RateLimitExceeded("x".into()).is_retryable());
    }

    #[test]
    fn test_only_authentication_is_fatal() {
        assert!(ExchangeError::Authentication("x".into()).is_fatal());
        assert!(!ExchangeError::Network("x".into()).is_fatal());
        assert!(!ExchangeError::OrderNotFound("x".into()).is_fatal());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ExchangeError::InvalidOrder("x".into()).kind(), "invalid_order");
        assert_eq!(ExchangeError::RateLimitExceeded("x".into()).kind(), "rate_limit_exceeded");
    }
}
