//! Exchange adapters for Binance, OKX and Bybit USDT perpetuals
//!
//! Every venue implements `ExchangeAdapter` with normalized symbols
//! (`BASE/QUOTE`), millisecond timestamps and the `ExchangeError` taxonomy.
//! `ConnectionManager` keeps a set of them connected.

pub mod errors;
pub mod factory;
pub mod manager;
pub mod normalize;
pub mod settings;
pub mod shared;
pub mod traits;
pub mod types;

pub mod binance;
pub mod bybit;
pub mod okx;

#[cfg(test)]
pub mod test_utils;

pub use errors::{ExchangeError, ExchangeResult};
pub use factory::{create_adapter, AnyAdapter, SUPPORTED_EXCHANGES};
pub use manager::{ConnectionManager, ExchangeStatus, SharedAdapter, TaggedCallback, TaggedMessage};
pub use settings::AdapterSettings;
pub use traits::ExchangeAdapter;
pub use types::{
    AccountInfo, AdapterEvent, Balance, Credentials, Order, OrderBook, OrderBookLevel,
    OrderRequest, OrderSide, OrderStatus, OrderType, Position, StreamCallback, StreamMessage,
    SubscriptionKey, SubscriptionType, Ticker, TimeInForce, Trade,
};

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use okx::OkxAdapter;
