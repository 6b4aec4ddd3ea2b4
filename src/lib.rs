//! Perp desk - multi-exchange perpetual futures connection core
//!
//! - Exchange adapters (Binance, OKX, Bybit) behind one `ExchangeAdapter` trait
//! - `ConnectionManager`: health monitoring, reconnect with backoff, batch
//!   queries and fan-out subscriptions
//! - `TaskScheduler`: recurring tasks with randomized intervals

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;

pub use error::AppError;
