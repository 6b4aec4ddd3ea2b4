//! Connection Event System
//!
//! Lifecycle events published by the `ConnectionManager` on its broadcast
//! bus. Transient disconnects and terminal reconnect exhaustion are distinct
//! variants so subscribers never have to infer one from the other.
//!
//! # Example
//!
//! ```ignore
//! let mut events = manager.subscribe_events();
//! while let Ok(event) = events.recv().await {
//!     if let ManagerEvent::ReconnectFailed { exchange, .. } = &event {
//!         alert(exchange);
//!     }
//! }
//! ```

use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Capacity of the manager event bus; slow receivers see `Lagged`
pub const MANAGER_EVENT_CAPACITY: usize = 256;

/// Event kind, used for the `event_type` log field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEventType {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
    ReconnectFailed,
    WsError,
    Error,
}

impl fmt::Display for ManagerEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerEventType::Connected => write!(f, "CONNECTED"),
            ManagerEventType::Disconnected => write!(f, "DISCONNECTED"),
            ManagerEventType::Reconnecting => write!(f, "RECONNECTING"),
            ManagerEventType::Reconnected => write!(f, "RECONNECTED"),
            ManagerEventType::ReconnectFailed => write!(f, "RECONNECT_FAILED"),
            ManagerEventType::WsError => write!(f, "WS_ERROR"),
            ManagerEventType::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerEvent {
    Connected {
        exchange: String,
    },
    /// Connection lost or closed; may be followed by `Reconnecting`
    Disconnected {
        exchange: String,
        reason: Option<String>,
    },
    Reconnecting {
        exchange: String,
        attempt: u32,
        delay_ms: u64,
    },
    Reconnected {
        exchange: String,
        attempts: u32,
    },
    /// Terminal: automatic attempts stop until the exchange is re-added
    ReconnectFailed {
        exchange: String,
        attempts: u32,
        reason: String,
    },
    WsError {
        exchange: String,
        message: String,
    },
    Error {
        exchange: String,
        message: String,
    },
}

impl ManagerEvent {
    pub fn exchange(&self) -> &str {
        match self {
            ManagerEvent::Connected { exchange }
            | ManagerEvent::Disconnected { exchange, .. }
            | ManagerEvent::Reconnecting { exchange, .. }
            | ManagerEvent::Reconnected { exchange, .. }
            | ManagerEvent::ReconnectFailed { exchange, .. }
            | ManagerEvent::WsError { exchange, .. }
            | ManagerEvent::Error { exchange, .. } => exchange,
        }
    }

    pub fn event_type(&self) -> ManagerEventType {
        match self {
            ManagerEvent::Connected { .. } => ManagerEventType::Connected,
            ManagerEvent::Disconnected { .. } => ManagerEventType::Disconnected,
            ManagerEvent::Reconnecting { .. } => ManagerEventType::Reconnecting,
            ManagerEvent::Reconnected { .. } => ManagerEventType::Reconnected,
            ManagerEvent::ReconnectFailed { .. } => ManagerEventType::ReconnectFailed,
            ManagerEvent::WsError { .. } => ManagerEventType::WsError,
            ManagerEvent::Error { .. } => ManagerEventType::Error,
        }
    }

    pub fn error(exchange: &str, message: impl Into<String>) -> Self {
        ManagerEvent::Error {
            exchange: exchange.to_string(),
            message: message.into(),
        }
    }
}

/// Log an event with a level matching its severity
pub fn log_event(event: &ManagerEvent) {
    let event_type = event.event_type().to_string();
    let exchange = event.exchange();

    match event {
        ManagerEvent::Connected { .. } | ManagerEvent::Reconnected { .. } => {
            info!(event_type = %event_type, exchange = %exchange, "");
        }
        ManagerEvent::Reconnecting { attempt, delay_ms, .. } => {
            warn!(event_type = %event_type, exchange = %exchange, attempt = attempt, delay_ms = delay_ms, "");
        }
        ManagerEvent::Disconnected { reason, .. } => {
            warn!(event_type = %event_type, exchange = %exchange, reason = ?reason, "");
        }
        ManagerEvent::ReconnectFailed { attempts, reason, .. } => {
            error!(event_type = %event_type, exchange = %exchange, attempts = attempts, reason = %reason, "");
        }
        ManagerEvent::WsError { message, .. } => {
            debug!(event_type = %event_type, exchange = %exchange, message = %message, "");
        }
        ManagerEvent::Error { message, .. } => {
            error!(event_type = %event_type, exchange = %exchange, message = %message, "");
        }
    }
}
