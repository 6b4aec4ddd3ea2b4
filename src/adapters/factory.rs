//! Adapter factory for dynamic exchange selection
//!
//! Creates `ExchangeAdapter` instances from config strings.
//! Uses an enum-based dispatch pattern (no `Box<dyn>`) to preserve monomorphization.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::adapters::binance::BinanceAdapter;
use crate::adapters::bybit::BybitAdapter;
use crate::adapters::errors::ExchangeResult;
use crate::adapters::okx::OkxAdapter;
use crate::adapters::settings::AdapterSettings;
use crate::adapters::traits::ExchangeAdapter;
use crate::error::AppError;
use crate::adapters::types::{
    AccountInfo, AdapterEvent, Balance, Credentials, Order, OrderBook, OrderRequest, Position,
    StreamCallback, SubscriptionType, Ticker, Trade,
};

// =============================================================================
// AnyAdapter: enum-based dispatch for dynamic exchange selection
// =============================================================================

/// Enum wrapping all concrete adapter types for runtime dispatch.
pub enum AnyAdapter {
    Binance(BinanceAdapter),
    Okx(OkxAdapter),
    Bybit(BybitAdapter),
}

/// Macro to reduce boilerplate for delegating trait methods
macro_rules! delegate {
    ($self:expr, $method:ident ( $($arg:expr),* )) => {
        match $self {
            AnyAdapter::Binance(a) => a.$method($($arg),*),
            AnyAdapter::Okx(a) => a.$method($($arg),*),
            AnyAdapter::Bybit(a) => a.$method($($arg),*),
        }
    };
    (await $self:expr, $method:ident ( $($arg:expr),* )) => {
        match $self {
            AnyAdapter::Binance(a) => a.$method($($arg),*).await,
            AnyAdapter::Okx(a) => a.$method($($arg),*).await,
            AnyAdapter::Bybit(a) => a.$method($($arg),*).await,
        }
    };
}

#[async_trait]
impl ExchangeAdapter for AnyAdapter {
    async fn connect(&mut self, credentials: &Credentials) -> ExchangeResult<()> {
        delegate!(await self, connect(credentials))
    }

    async fn disconnect(&mut self) -> ExchangeResult<()> {
        delegate!(await self, disconnect())
    }

    fn validate_credentials(&self, credentials: &Credentials) -> ExchangeResult<()> {
        delegate!(self, validate_credentials(credentials))
    }

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo> {
        delegate!(await self, get_account_info())
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<Balance>> {
        delegate!(await self, get_balances())
    }

    async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Position>> {
        delegate!(await self, get_positions(symbol))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        delegate!(await self, set_leverage(symbol, leverage))
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        delegate!(await self, get_ticker(symbol))
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        delegate!(await self, get_order_book(symbol, depth))
    }

    async fn get_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<Trade>> {
        delegate!(await self, get_trades(symbol, limit))
    }

    async fn create_order(&self, request: OrderRequest) -> ExchangeResult<Order> {
        delegate!(await self, create_order(request))
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        delegate!(await self, cancel_order(order_id, symbol))
    }

    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        delegate!(await self, get_order(order_id, symbol))
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        delegate!(await self, get_open_orders(symbol))
    }

    async fn subscribe(
        &mut self,
        kind: SubscriptionType,
        symbol: &str,
        callback: StreamCallback,
    ) -> ExchangeResult<bool> {
        delegate!(await self, subscribe(kind, symbol, callback))
    }

    async fn unsubscribe(&mut self, kind: SubscriptionType, symbol: &str) -> ExchangeResult<bool> {
        delegate!(await self, unsubscribe(kind, symbol))
    }

    fn subscription_count(&self) -> usize {
        delegate!(self, subscription_count())
    }

    fn is_connected(&self) -> bool {
        delegate!(self, is_connected())
    }

    fn is_ws_connected(&self) -> bool {
        delegate!(self, is_ws_connected())
    }

    fn last_heartbeat(&self) -> u64 {
        delegate!(self, last_heartbeat())
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        delegate!(self, events())
    }

    fn exchange_name(&self) -> &'static str {
        delegate!(self, exchange_name())
    }
}

// =============================================================================
// Factory Functions
// =============================================================================

/// All supported exchange adapter names.
pub const SUPPORTED_EXCHANGES: &[&str] = &["binance", "okx", "bybit"];

/// Create an adapter from a config name string.
///
/// The adapter is created but NOT connected; call `connect()` after.
pub fn create_adapter(name: &str, settings: &AdapterSettings) -> Result<AnyAdapter, AppError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "binance" => Ok(AnyAdapter::Binance(BinanceAdapter::new(settings.clone()))),
        "okx" => Ok(AnyAdapter::Okx(OkxAdapter::new(settings.clone()))),
        "bybit" => Ok(AnyAdapter::Bybit(BybitAdapter::new(settings.clone()))),
        _ => Err(AppError::Config(format!(
            "Unknown exchange adapter: '{}'. Supported: {}",
            name,
            SUPPORTED_EXCHANGES.join(", ")
        ))),
    }
}
