//! Shared helpers for exchange adapters
//!
//! WebSocket session management, subscription bookkeeping and REST plumbing
//! used by every venue.

pub mod http;
pub mod subscriptions;
pub mod websocket;

pub use subscriptions::{Registration, SubscriptionRegistry};
pub use websocket::{connect_tls, StreamClient, StreamFrame, StreamProtocol, WsSession};
