//! Core data types for exchange adapters
//!
//! Normalized value objects returned by every adapter. Symbols are always
//! `BASE/QUOTE`, timestamps are Unix milliseconds and numeric fields are
//! rounded to `VALUE_PRECISION` decimal places by the adapter that built them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::config::logging::SanitizedValue;

// =============================================================================
// HTTP Client Constants
// =============================================================================

/// HTTP request timeout (seconds)
const HTTP_TIMEOUT_SECS: u64 = 10;
/// HTTP connection timeout (milliseconds)
const HTTP_CONNECT_TIMEOUT_MS: u64 = 3000;
/// Max idle connections per host in connection pool
const HTTP_POOL_MAX_IDLE: usize = 5;
/// How long idle connections stay in the pool (seconds)
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 60;
/// TCP keepalive interval (seconds)
const HTTP_TCP_KEEPALIVE_SECS: u64 = 30;

/// Decimal places kept on every normalized numeric field
pub const VALUE_PRECISION: u32 = 8;

/// WebSocket ping interval (seconds)
pub const WS_PING_INTERVAL_SECS: u64 = 15;

/// A session whose last pong is older than this is considered dead
pub const WS_PONG_TIMEOUT_MS: u64 = 45_000;

/// Create the pooled HTTP client shared by one adapter instance
pub fn create_http_client(exchange_name: &str) -> reqwest::Client {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE)
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .tcp_keepalive(Duration::from_secs(HTTP_TCP_KEEPALIVE_SECS))
        .connect_timeout(Duration::from_millis(HTTP_CONNECT_TIMEOUT_MS))
        .tcp_nodelay(true)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());
    tracing::debug!(
        phase = "init",
        exchange = %exchange_name,
        timeout_s = HTTP_TIMEOUT_SECS,
        connect_timeout_ms = HTTP_CONNECT_TIMEOUT_MS,
        "HTTP client configured"
    );
    client
}

/// Current Unix time in milliseconds
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Credentials
// =============================================================================

/// API credentials bound to exactly one adapter instance
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    /// Required by some venues (OKX)
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Route requests to the exchange's test environment
    #[serde(default)]
    pub sandbox: bool,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: None,
            sandbox: false,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Load credentials for `exchange` from `{NAME}_API_KEY`, `{NAME}_API_SECRET`,
    /// `{NAME}_PASSPHRASE` and `{NAME}_SANDBOX`.
    pub fn from_env(exchange: &str) -> ExchangeResult<Self> {
        let prefix = exchange.to_uppercase();
        let var = |suffix: &str| std::env::var(format!("{}_{}", prefix, suffix)).ok();

        let api_key = var("API_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ExchangeError::Authentication(format!("{}_API_KEY not set", prefix)))?;
        let api_secret = var("API_SECRET")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ExchangeError::Authentication(format!("{}_API_SECRET not set", prefix))
            })?;
        let passphrase = var("PASSPHRASE").filter(|v| !v.is_empty());
        let sandbox = var("SANDBOX")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            api_key,
            api_secret,
            passphrase,
            sandbox,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &SanitizedValue::new(&self.api_key).to_string())
            .field("api_secret", &"REDACTED")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "REDACTED"))
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

// =============================================================================
// Connection Health Types
// =============================================================================

/// Shared connection health state for a WebSocket session
///
/// Atomics are shared between the reader loop, the heartbeat task and the
/// adapter itself.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHealth {
    /// Timestamp of last PONG / heartbeat response (Unix ms)
    pub last_pong: Arc<AtomicU64>,
    /// Timestamp of last data received (Unix ms), any message counts
    pub last_data: Arc<AtomicU64>,
    /// Cleared when the reader loop exits or the heartbeat gives up
    pub reader_alive: Arc<AtomicBool>,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent sign of life from the session (Unix ms, 0 = never)
    pub fn last_heartbeat(&self) -> u64 {
        self.last_pong
            .load(Ordering::Relaxed)
            .max(self.last_data.load(Ordering::Relaxed))
    }

    pub fn is_alive(&self) -> bool {
        self.reader_alive.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.last_pong.store(0, Ordering::Relaxed);
        self.last_data.store(0, Ordering::Relaxed);
        self.reader_alive.store(false, Ordering::Relaxed);
    }
}

// =============================================================================
// Adapter Events
// =============================================================================

/// Lifecycle notifications emitted by an adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AdapterEvent {
    Connected { exchange: String },
    Disconnected { exchange: String },
    WsError { exchange: String, message: String },
    Heartbeat { exchange: String, timestamp: u64 },
}

/// Capacity of each adapter's event channel
pub const ADAPTER_EVENT_CAPACITY: usize = 64;

// =============================================================================
// Account Types
// =============================================================================

/// Per-asset balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub total: f64,
    pub free: f64,
    pub used: f64,
    pub unrealized_pnl: f64,
}

/// Account summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub exchange: String,
    pub total_equity: f64,
    pub available_balance: f64,
    pub unrealized_pnl: f64,
    pub balances: Vec<Balance>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Cross,
    Isolated,
}

/// Open perpetual position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute size in base units (or contracts where the venue uses them)
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub liquidation_price: Option<f64>,
    pub leverage: f64,
    pub margin_mode: MarginMode,
    pub timestamp: u64,
}

// =============================================================================
// Market Data Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    pub quote_volume_24h: f64,
    pub change_percent_24h: Option<f64>,
    pub timestamp: u64,
}

/// A single level in the orderbook (price + quantity)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBookLevel {
    pub price: f64,
    pub amount: f64,
}

impl OrderBookLevel {
    pub fn new(price: f64, amount: f64) -> Self {
        Self { price, amount }
    }
}

/// Orderbook snapshot: bids descending, asks ascending
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub timestamp: u64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

/// Public trade print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub price: f64,
    pub amount: f64,
    pub side: OrderSide,
    pub timestamp: u64,
}

// =============================================================================
// Order Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    #[default]
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// Unified order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: f64,
    pub price: Option<f64>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, amount: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
            client_order_id: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, amount: f64, price: f64) -> Self {
        Self {
            price: Some(price),
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, amount)
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Client order id, generating a fresh one if the caller left it empty
    pub fn client_order_id_or_new(&self) -> String {
        self.client_order_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
    }

    /// Validate the request before it is sent anywhere
    pub fn validate(&self) -> ExchangeResult<()> {
        if !self.symbol.contains('/') {
            return Err(ExchangeError::InvalidOrder(format!(
                "symbol must be BASE/QUOTE, got '{}'",
                self.symbol
            )));
        }
        if !(self.amount.is_finite() && self.amount > 0.0) {
            return Err(ExchangeError::InvalidOrder(format!(
                "amount must be > 0, got {}",
                self.amount
            )));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err(ExchangeError::InvalidOrder(
                "limit order requires a price".into(),
            )),
            (_, Some(p)) if !(p.is_finite() && p > 0.0) => Err(ExchangeError::InvalidOrder(
                format!("price must be > 0, got {}", p),
            )),
            _ => Ok(()),
        }
    }
}

/// Normalized order state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Option<f64>,
    pub average_price: Option<f64>,
    pub amount: f64,
    pub filled: f64,
    pub remaining: f64,
    pub timestamp: u64,
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    Ticker,
    OrderBook,
    Trades,
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionType::Ticker => write!(f, "ticker"),
            SubscriptionType::OrderBook => write!(f, "orderbook"),
            SubscriptionType::Trades => write!(f, "trades"),
        }
    }
}

/// Subscription identity: one stream per (type, normalized symbol)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub kind: SubscriptionType,
    pub symbol: String,
}

impl SubscriptionKey {
    /// Key for `(kind, symbol)`; the symbol is trimmed and upper-cased so
    /// `eth/usdt` and `ETH/USDT` name the same stream
    pub fn new(kind: SubscriptionType, symbol: impl AsRef<str>) -> Self {
        Self {
            kind,
            symbol: symbol.as_ref().trim().to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.symbol)
    }
}

/// Normalized stream payload delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamMessage {
    Ticker(Ticker),
    OrderBook(OrderBook),
    Trade(Trade),
}

impl StreamMessage {
    pub fn symbol(&self) -> &str {
        match self {
            StreamMessage::Ticker(t) => &t.symbol,
            StreamMessage::OrderBook(b) => &b.symbol,
            StreamMessage::Trade(t) => &t.symbol,
        }
    }
}

/// Listener invoked for each stream message of one subscription
pub type StreamCallback = Arc<dyn Fn(StreamMessage) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orderbook_best_prices() {
        let ob = OrderBook {
            symbol: "BTC/USDT".into(),
            bids: vec![OrderBookLevel::new(42100.0, 1.0), OrderBookLevel::new(42050.0, 2.0)],
            asks: vec![OrderBookLevel::new(42150.0, 1.5), OrderBookLevel::new(42200.0, 2.0)],
            timestamp: 1706000000000,
        };
        assert_eq!(ob.best_bid(), Some(42100.0));
        assert_eq!(ob.best_ask(), Some(42150.0));
        assert_eq!(ob.mid_price(), Some(42125.0));
    }

    #[test]
    fn test_orderbook_empty() {
        let ob = OrderBook::default();
        assert_eq!(ob.best_bid(), None);
        assert_eq!(ob.mid_price(), None);
    }

    #[test]
    fn test_order_request_validation() {
        assert!(OrderRequest::market("BTC/USDT", OrderSide::Buy, 0.01).validate().is_ok());
        assert!(OrderRequest::limit("BTC/USDT", OrderSide::Sell, 0.01, 50000.0)
            .validate()
            .is_ok());

        let err = OrderRequest::market("BTCUSDT", OrderSide::Buy, 0.01).validate().unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(_)));

        let err = OrderRequest::market("BTC/USDT", OrderSide::Buy, 0.0).validate().unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidOrder(_)));

        let mut req = OrderRequest::limit("BTC/USDT", OrderSide::Buy, 1.0, 100.0);
        req.price = None;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_client_order_id_generated_when_missing() {
        let req = OrderRequest::market("ETH/USDT", OrderSide::Buy, 1.0);
        let a = req.client_order_id_or_new();
        let b = req.client_order_id_or_new();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);

        let req = req.with_client_order_id("mine");
        assert_eq!(req.client_order_id_or_new(), "mine");
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials::new("abcdefghijklmnop", "super-secret").with_passphrase("pw");
        let dbg = format!("{:?}", creds);
        assert!(!dbg.contains("super-secret"));
        assert!(!dbg.contains("ijklmnop"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    #[serial_test::serial]
    fn test_credentials_from_env() {
        std::env::set_var("TESTEX_API_KEY", "key");
        std::env::set_var("TESTEX_API_SECRET", "secret");
        std::env::set_var("TESTEX_SANDBOX", "true");
        std::env::remove_var("TESTEX_PASSPHRASE");

        let creds = Credentials::from_env("testex").unwrap();
        assert_eq!(creds.api_key, "key");
        assert!(creds.sandbox);
        assert!(creds.passphrase.is_none());

        std::env::remove_var("TESTEX_API_SECRET");
        assert!(Credentials::from_env("testex").is_err());
        std::env::remove_var("TESTEX_API_KEY");
        std::env::remove_var("TESTEX_SANDBOX");
    }

    #[test]
    fn test_connection_health_heartbeat_is_latest_signal() {
        let health = ConnectionHealth::new();
        assert_eq!(health.last_heartbeat(), 0);
        health.last_data.store(100, Ordering::Relaxed);
        health.last_pong.store(250, Ordering::Relaxed);
        assert_eq!(health.last_heartbeat(), 250);

        let cloned = health.clone();
        cloned.reader_alive.store(true, Ordering::Relaxed);
        assert!(health.is_alive());
        health.reset();
        assert_eq!(cloned.last_heartbeat(), 0);
        assert!(!cloned.is_alive());
    }

    #[test]
    fn test_stream_message_serialization() {
        let msg = StreamMessage::Trade(Trade {
            id: "1".into(),
            symbol: "BTC/USDT".into(),
            price: 1.0,
            amount: 2.0,
            side: OrderSide::Sell,
            timestamp: 5,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"trade\""));
        assert_eq!(msg.symbol(), "BTC/USDT");
    }
}
