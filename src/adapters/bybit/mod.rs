//! Bybit v5 linear perpetual adapter module

pub mod adapter;
pub mod config;
pub mod types;

pub use adapter::BybitAdapter;
pub use config::BybitConfig;
