//! Binance Adapter Implementation
//!
//! USDⓈ-M futures over REST (`/fapi`) plus the public market stream.
//! Signed endpoints use `X-MBX-APIKEY` and a hex HMAC-SHA256 of the query.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::normalize::{format_amount, format_price, parse_num, to_concatenated};
use crate::adapters::settings::AdapterSettings;
use crate::adapters::shared::http::{
    decode, encode_query, map_http_status, read_body, status_overrides_body,
};
use crate::adapters::shared::{StreamClient, StreamFrame, StreamProtocol};
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::{
    create_http_client, current_time_ms, AccountInfo, AdapterEvent, Balance, Credentials, Order,
    OrderBook, OrderRequest, OrderSide, OrderType, Position, StreamCallback, StreamMessage,
    SubscriptionKey, SubscriptionType, Ticker, TimeInForce, Trade, ADAPTER_EVENT_CAPACITY,
};

use super::config::{depth_limit, BinanceConfig, MAX_TRADES_LIMIT};
use super::types::{
    Binance24hTicker, BinanceAccount, BinanceApiError, BinanceBalance, BinanceBookTicker,
    BinanceDepth, BinanceOrder, BinancePositionRisk, BinanceTrade, BinanceWsEvent, BinanceWsReply,
};

pub const EXCHANGE: &str = "binance";

// =============================================================================
// Signing & error codes
// =============================================================================

/// Hex HMAC-SHA256 of the query string
pub fn sign_query(secret: &str, query: &str) -> String {
    hex::encode(hmac_sha256::HMAC::mac(query.as_bytes(), secret.as_bytes()))
}

/// Map a Binance error code to the adapter taxonomy
pub fn map_error_code(code: i64, msg: &str) -> ExchangeError {
    let detail = format!("{} {}: {}", EXCHANGE, code, msg);
    match code {
        -2014 | -2015 | -1022 | -1002 => ExchangeError::Authentication(detail),
        -1003 | -1015 => ExchangeError::RateLimitExceeded(detail),
        -2018 | -2019 | -2024 => ExchangeError::InsufficientFunds(detail),
        -2011 | -2013 => ExchangeError::OrderNotFound(detail),
        -1000 | -1001 | -1006 | -1007 | -1021 => ExchangeError::Network(detail),
        -1199..=-1100 | -2010 | -2021 | -2022 | -4999..=-4000 => ExchangeError::InvalidOrder(detail),
        _ => ExchangeError::InvalidResponse(detail),
    }
}

// =============================================================================
// Stream protocol
// =============================================================================

pub struct BinanceStream {
    next_id: AtomicU64,
}

impl BinanceStream {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    fn stream_name(key: &SubscriptionKey) -> ExchangeResult<String> {
        let native = to_concatenated(&key.symbol)?.to_lowercase();
        Ok(match key.kind {
            SubscriptionType::Ticker => format!("{}@ticker", native),
            SubscriptionType::OrderBook => format!("{}@depth20@100ms", native),
            SubscriptionType::Trades => format!("{}@aggTrade", native),
        })
    }

    fn request(&self, method: &str, key: &SubscriptionKey) -> ExchangeResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(serde_json::json!({
            "method": method,
            "params": [Self::stream_name(key)?],
            "id": id,
        })
        .to_string())
    }
}

impl Default for BinanceStream {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamProtocol for BinanceStream {
    fn exchange(&self) -> &'static str {
        EXCHANGE
    }

    fn subscribe_frame(&self, key: &SubscriptionKey) -> ExchangeResult<String> {
        self.request("SUBSCRIBE", key)
    }

    fn unsubscribe_frame(&self, key: &SubscriptionKey) -> ExchangeResult<String> {
        self.request("UNSUBSCRIBE", key)
    }

    fn parse(&self, text: &str) -> Vec<StreamFrame> {
        if let Ok(event) = serde_json::from_str::<BinanceWsEvent>(text) {
            let frame = match event {
                BinanceWsEvent::Ticker(t) => t.to_ticker().map(|t| {
                    StreamFrame::Data(
                        SubscriptionKey::new(SubscriptionType::Ticker, &t.symbol),
                        StreamMessage::Ticker(t),
                    )
                }),
                BinanceWsEvent::Depth(d) => d.to_order_book().map(|b| {
                    StreamFrame::Data(
                        SubscriptionKey::new(SubscriptionType::OrderBook, &b.symbol),
                        StreamMessage::OrderBook(b),
                    )
                }),
                BinanceWsEvent::AggTrade(t) => t.to_trade().map(|t| {
                    StreamFrame::Data(
                        SubscriptionKey::new(SubscriptionType::Trades, &t.symbol),
                        StreamMessage::Trade(t),
                    )
                }),
            };
            return vec![frame.unwrap_or_else(|e| StreamFrame::Error(e.to_string()))];
        }

        match serde_json::from_str::<BinanceWsReply>(text) {
            Ok(BinanceWsReply {
                error: Some(err), ..
            }) => vec![StreamFrame::Error(format!("{}: {}", err.code, err.msg))],
            _ => vec![StreamFrame::Ignored],
        }
    }
}

// =============================================================================
// Binance Adapter
// =============================================================================

pub struct BinanceAdapter {
    config: BinanceConfig,
    http_client: reqwest::Client,
    credentials: Option<Credentials>,
    connected: bool,
    stream: StreamClient<BinanceStream>,
    events: broadcast::Sender<AdapterEvent>,
    /// Last successful REST response (Unix ms)
    last_rest_ok: Arc<AtomicU64>,
}

impl BinanceAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        let (events, _) = broadcast::channel(ADAPTER_EVENT_CAPACITY);
        Self {
            config: BinanceConfig::new(settings),
            http_client: create_http_client(EXCHANGE),
            credentials: None,
            connected: false,
            stream: StreamClient::new(BinanceStream::new()),
            events,
            last_rest_ok: Arc::new(AtomicU64::new(0)),
        }
    }

    fn credentials(&self) -> ExchangeResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::NotConnected(EXCHANGE.to_string()))
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ExchangeResult<T> {
        let (status, body) = read_body(response).await?;
        if status.is_success() {
            self.last_rest_ok.store(current_time_ms(), Ordering::Relaxed);
            return decode(EXCHANGE, &body);
        }
        if !status_overrides_body(status) {
            if let Ok(err) = serde_json::from_str::<BinanceApiError>(&body) {
                return Err(map_error_code(err.code, &err.msg));
            }
        }
        Err(map_http_status(EXCHANGE, status, &body))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let mut url = format!("{}{}", self.config.rest_url(), path);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&encode_query(params));
        }
        let response = self.http_client.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<T> {
        let credentials = self.credentials()?;
        params.push(("recvWindow", self.config.settings.recv_window_ms.to_string()));
        params.push(("timestamp", current_time_ms().to_string()));
        let query = encode_query(&params);
        let signature = sign_query(&credentials.api_secret, &query);
        let url = format!(
            "{}{}?{}&signature={}",
            self.config.rest_url(),
            path,
            query,
            signature
        );

        tracing::debug!(exchange = EXCHANGE, method = %method, path = path, "Signed request");
        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Numeric ids are exchange ids, anything else is our client id
    fn order_id_param(order_id: &str) -> (&'static str, String) {
        if order_id.chars().all(|c| c.is_ascii_digit()) {
            ("orderId", order_id.to_string())
        } else {
            ("origClientOrderId", order_id.to_string())
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    async fn connect(&mut self, credentials: &Credentials) -> ExchangeResult<()> {
        self.validate_credentials(credentials)?;
        self.config.sandbox = credentials.sandbox;
        self.credentials = Some(credentials.clone());

        // Authenticated request first: bad keys fail here, before any socket is opened
        if let Err(e) = self
            .signed_request::<BinanceAccount>(Method::GET, "/fapi/v2/account", Vec::new())
            .await
        {
            self.credentials = None;
            return Err(e);
        }

        if self.config.settings.enable_websocket {
            let url = self.config.ws_url();
            if let Err(e) = self.stream.open(&url, self.events.clone()).await {
                self.credentials = None;
                return Err(e);
            }
        }

        self.connected = true;
        let _ = self.events.send(AdapterEvent::Connected {
            exchange: EXCHANGE.to_string(),
        });
        tracing::info!(exchange = EXCHANGE, sandbox = credentials.sandbox, "Connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> ExchangeResult<()> {
        self.stream.close().await;
        let was_connected = std::mem::replace(&mut self.connected, false);
        self.credentials = None;
        if was_connected {
            let _ = self.events.send(AdapterEvent::Disconnected {
                exchange: EXCHANGE.to_string(),
            });
        }
        tracing::info!(exchange = EXCHANGE, "Disconnected");
        Ok(())
    }

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo> {
        let account: BinanceAccount = self
            .signed_request(Method::GET, "/fapi/v2/account", Vec::new())
            .await?;
        let balances = account
            .assets
            .iter()
            .map(|a| a.to_balance())
            .collect::<ExchangeResult<Vec<_>>>()?
            .into_iter()
            .filter(|b| b.total != 0.0 || b.unrealized_pnl != 0.0)
            .collect();

        Ok(AccountInfo {
            exchange: EXCHANGE.to_string(),
            total_equity: parse_num(&account.total_margin_balance, "totalMarginBalance")?,
            available_balance: parse_num(&account.available_balance, "availableBalance")?,
            unrealized_pnl: parse_num(&account.total_unrealized_profit, "totalUnrealizedProfit")?,
            balances,
            timestamp: current_time_ms(),
        })
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<Balance>> {
        let rows: Vec<BinanceBalance> = self
            .signed_request(Method::GET, "/fapi/v2/balance", Vec::new())
            .await?;
        rows.iter().map(BinanceBalance::to_balance).collect()
    }

    async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Position>> {
        let mut params = Vec::new();
        if let Some(symbol) = symbol {
            params.push(("symbol", to_concatenated(symbol)?));
        }
        let rows: Vec<BinancePositionRisk> = self
            .signed_request(Method::GET, "/fapi/v2/positionRisk", params)
            .await?;

        let mut positions = Vec::new();
        for row in &rows {
            if let Some(position) = row.to_position()? {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let params = vec![
            ("symbol", to_concatenated(symbol)?),
            ("leverage", leverage.to_string()),
        ];
        let _: serde_json::Value = self
            .signed_request(Method::POST, "/fapi/v1/leverage", params)
            .await?;
        tracing::info!(exchange = EXCHANGE, symbol = symbol, leverage = leverage, "Leverage set");
        Ok(())
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let params = [("symbol", to_concatenated(symbol)?)];
        let (stats, book) = tokio::join!(
            self.public_get::<Binance24hTicker>("/fapi/v1/ticker/24hr", &params),
            self.public_get::<BinanceBookTicker>("/fapi/v1/ticker/bookTicker", &params),
        );
        let book = match book {
            Ok(book) => Some(book),
            Err(e) => {
                tracing::debug!(exchange = EXCHANGE, symbol = symbol, error = %e, "bookTicker unavailable");
                None
            }
        };
        stats?.to_ticker(book.as_ref())
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        let params = [
            ("symbol", to_concatenated(symbol)?),
            ("limit", depth_limit(depth).to_string()),
        ];
        let raw: BinanceDepth = self.public_get("/fapi/v1/depth", &params).await?;
        raw.to_order_book(symbol, depth)
    }

    async fn get_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<Trade>> {
        let params = [
            ("symbol", to_concatenated(symbol)?),
            ("limit", limit.clamp(1, MAX_TRADES_LIMIT).to_string()),
        ];
        let rows: Vec<BinanceTrade> = self.public_get("/fapi/v1/trades", &params).await?;
        rows.iter().map(|t| t.to_trade(symbol)).collect()
    }

    async fn create_order(&self, request: OrderRequest) -> ExchangeResult<Order> {
        request.validate()?;
        let settings = &self.config.settings;

        let mut params = vec![
            ("symbol", to_concatenated(&request.symbol)?),
            (
                "side",
                match request.side {
                    OrderSide::Buy => "BUY".to_string(),
                    OrderSide::Sell => "SELL".to_string(),
                },
            ),
            (
                "type",
                match request.order_type {
                    OrderType::Market => "MARKET".to_string(),
                    OrderType::Limit => "LIMIT".to_string(),
                },
            ),
            ("quantity", format_amount(request.amount, settings.amount_precision)),
            ("newClientOrderId", request.client_order_id_or_new()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if request.order_type == OrderType::Limit {
            if let Some(price) = request.price {
                params.push(("price", format_price(price, settings.price_precision)));
            }
            let tif = match request.time_in_force {
                TimeInForce::Gtc => "GTC",
                TimeInForce::Ioc => "IOC",
                TimeInForce::Fok => "FOK",
            };
            params.push(("timeInForce", tif.to_string()));
        }
        if request.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        let raw: BinanceOrder = self
            .signed_request(Method::POST, "/fapi/v1/order", params)
            .await?;
        let order = raw.to_order()?;
        tracing::info!(
            exchange = EXCHANGE,
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            amount = order.amount,
            "Order placed"
        );
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let params = vec![
            ("symbol", to_concatenated(symbol)?),
            Self::order_id_param(order_id),
        ];
        let raw: BinanceOrder = self
            .signed_request(Method::DELETE, "/fapi/v1/order", params)
            .await?;
        raw.to_order()
    }

    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let params = vec![
            ("symbol", to_concatenated(symbol)?),
            Self::order_id_param(order_id),
        ];
        let raw: BinanceOrder = self
            .signed_request(Method::GET, "/fapi/v1/order", params)
            .await?;
        raw.to_order()
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        let mut params = Vec::new();
        if let Some(symbol) = symbol {
            params.push(("symbol", to_concatenated(symbol)?));
        }
        let rows: Vec<BinanceOrder> = self
            .signed_request(Method::GET, "/fapi/v1/openOrders", params)
            .await?;
        rows.iter().map(BinanceOrder::to_order).collect()
    }

    async fn subscribe(
        &mut self,
        kind: SubscriptionType,
        symbol: &str,
        callback: StreamCallback,
    ) -> ExchangeResult<bool> {
        to_concatenated(symbol)?;
        self.stream
            .subscribe(SubscriptionKey::new(kind, symbol), callback)
            .await
    }

    async fn unsubscribe(&mut self, kind: SubscriptionType, symbol: &str) -> ExchangeResult<bool> {
        self.stream
            .unsubscribe(&SubscriptionKey::new(kind, symbol))
            .await
    }

    fn subscription_count(&self) -> usize {
        self.stream.subscription_count()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_ws_connected(&self) -> bool {
        if self.config.settings.enable_websocket {
            self.connected && self.stream.is_open()
        } else {
            self.connected
        }
    }

    fn last_heartbeat(&self) -> u64 {
        self.stream
            .last_heartbeat()
            .max(self.last_rest_ok.load(Ordering::Relaxed))
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }

    fn exchange_name(&self) -> &'static str {
        EXCHANGE
    }
}
