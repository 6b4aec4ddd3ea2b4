//! OKX v5 perpetual swap adapter module

pub mod adapter;
pub mod config;
pub mod types;

pub use adapter::OkxAdapter;
pub use config::OkxConfig;
