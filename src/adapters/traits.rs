//! Exchange adapter trait definition
//!
//! The ExchangeAdapter trait is the single capability interface every venue
//! implements. Inputs and outputs are normalized (`BASE/QUOTE` symbols,
//! millisecond timestamps, rounded numbers); errors use the `ExchangeError`
//! taxonomy only.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::types::{
    AccountInfo, AdapterEvent, Balance, Credentials, Order, OrderBook, OrderRequest, Position,
    StreamCallback, SubscriptionType, Ticker, Trade,
};

/// Common trait for all exchange adapters
///
/// # Example
///
/// ```ignore
/// let mut adapter = create_adapter("binance", &AdapterSettings::default())?;
/// adapter.connect(&Credentials::from_env("binance")?).await?;
/// let ticker = adapter.get_ticker("BTC/USDT").await?;
/// ```
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Establish the REST session and the market-data WebSocket
    ///
    /// Verifies the credentials with an authenticated request first, so bad
    /// keys surface as `ExchangeError::Authentication` before any socket is
    /// opened. Emits `AdapterEvent::Connected` on success.
    async fn connect(&mut self, credentials: &Credentials) -> ExchangeResult<()>;

    /// Tear down the WebSocket and clear all subscription state
    async fn disconnect(&mut self) -> ExchangeResult<()>;

    /// Check that `credentials` carry every field this venue needs
    fn validate_credentials(&self, credentials: &Credentials) -> ExchangeResult<()> {
        if credentials.api_key.trim().is_empty() {
            return Err(ExchangeError::Authentication(format!(
                "{}: api_key is required",
                self.exchange_name()
            )));
        }
        if credentials.api_secret.trim().is_empty() {
            return Err(ExchangeError::Authentication(format!(
                "{}: api_secret is required",
                self.exchange_name()
            )));
        }
        Ok(())
    }

    // ---- account ---------------------------------------------------------

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo>;

    async fn get_balances(&self) -> ExchangeResult<Vec<Balance>>;

    /// Open positions, optionally filtered to one symbol
    async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Position>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()>;

    // ---- market data -----------------------------------------------------

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook>;

    async fn get_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<Trade>>;

    // ---- orders ----------------------------------------------------------

    /// Place an order; the request is validated locally before any I/O
    async fn create_order(&self, request: OrderRequest) -> ExchangeResult<Order>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order>;

    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order>;

    async fn get_open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>>;

    // ---- streams ---------------------------------------------------------

    /// Subscribe to a market-data stream
    ///
    /// One stream per `(kind, symbol)`, symbols compared case-insensitively.
    /// Returns `Ok(true)` when a new stream was opened. A further callback on
    /// an open key is added as another listener and returns `Ok(false)`
    /// without touching the socket; re-registering the same callback is a
    /// no-op.
    async fn subscribe(
        &mut self,
        kind: SubscriptionType,
        symbol: &str,
        callback: StreamCallback,
    ) -> ExchangeResult<bool>;

    /// Drop every listener for `(kind, symbol)`; `Ok(false)` if none existed
    async fn unsubscribe(&mut self, kind: SubscriptionType, symbol: &str) -> ExchangeResult<bool>;

    fn subscription_count(&self) -> usize;

    // ---- state -----------------------------------------------------------

    /// REST session established and not torn down
    fn is_connected(&self) -> bool;

    /// Market-data socket alive (reader running, pongs fresh)
    fn is_ws_connected(&self) -> bool;

    /// Last sign of life from the exchange (Unix ms, 0 = never)
    fn last_heartbeat(&self) -> u64;

    /// New receiver for this adapter's lifecycle events
    fn events(&self) -> broadcast::Receiver<AdapterEvent>;

    /// Static identifier ("binance", "okx", "bybit", ...)
    fn exchange_name(&self) -> &'static str;
}
