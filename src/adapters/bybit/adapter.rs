//! Bybit Adapter Implementation
//!
//! v5 unified API, `linear` category. Requests are signed with a hex
//! HMAC-SHA256 over `timestamp + api_key + recv_window + payload`, where the
//! payload is the query string for GET and the JSON body for POST.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::normalize::{format_amount, format_price, parse_num, to_concatenated};
use crate::adapters::settings::AdapterSettings;
use crate::adapters::shared::http::{
    encode_query, map_http_status, read_body, status_overrides_body,
};
use crate::adapters::shared::{StreamClient, StreamFrame, StreamProtocol};
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::{
    create_http_client, current_time_ms, AccountInfo, AdapterEvent, Balance, Credentials, Order,
    OrderBook, OrderRequest, OrderSide, OrderStatus, OrderType, Position, StreamCallback,
    StreamMessage, SubscriptionKey, SubscriptionType, Ticker, TimeInForce, Trade,
    ADAPTER_EVENT_CAPACITY,
};

use super::config::{BybitConfig, CATEGORY, MAX_BOOK_DEPTH, MAX_TRADES_LIMIT, STREAM_BOOK_DEPTH};
use super::types::{
    BybitBook, BybitList, BybitOrder, BybitOrderAck, BybitPosition, BybitResponse, BybitTicker,
    BybitTrade, BybitWallet, BybitWsMessage, BybitWsTrade, LocalBook, StreamState,
};

pub const EXCHANGE: &str = "bybit";

/// Settlement coin used when listing positions/orders without a symbol
const SETTLE_COIN: &str = "USDT";

/// "leverage not modified": requested value already set
const LEVERAGE_NOT_MODIFIED: i64 = 110043;

// =============================================================================
// Signing & error codes
// =============================================================================

/// hex(HMAC-SHA256(secret, timestamp + api_key + recv_window + payload))
pub fn sign_payload(secret: &str, timestamp: u64, api_key: &str, recv_window: u64, payload: &str) -> String {
    let message = format!("{}{}{}{}", timestamp, api_key, recv_window, payload);
    hex::encode(hmac_sha256::HMAC::mac(message.as_bytes(), secret.as_bytes()))
}

/// Map a Bybit `retCode` to the adapter taxonomy
pub fn map_error_code(code: i64, msg: &str) -> ExchangeError {
    let detail = format!("{} {}: {}", EXCHANGE, code, msg);
    match code {
        10003 | 10004 | 10005 | 10007 | 10009 | 33004 => ExchangeError::Authentication(detail),
        10006 | 10018 => ExchangeError::RateLimitExceeded(detail),
        110004 | 110007 | 110012 | 110044 | 110045 => ExchangeError::InsufficientFunds(detail),
        110001 | 170213 => ExchangeError::OrderNotFound(detail),
        10002 | 10016 | 10019 => ExchangeError::Network(detail),
        10001 | 110000..=110099 | 170000..=170999 => ExchangeError::InvalidOrder(detail),
        _ => ExchangeError::InvalidResponse(detail),
    }
}

// =============================================================================
// Stream protocol
// =============================================================================

/// Public linear stream; merges ticker/book deltas into full snapshots
#[derive(Default)]
pub struct BybitStream {
    state: Mutex<StreamState>,
}

impl BybitStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn topic(key: &SubscriptionKey) -> ExchangeResult<String> {
        let native = to_concatenated(&key.symbol)?;
        Ok(match key.kind {
            SubscriptionType::Ticker => format!("tickers.{}", native),
            SubscriptionType::OrderBook => format!("orderbook.{}.{}", STREAM_BOOK_DEPTH, native),
            SubscriptionType::Trades => format!("publicTrade.{}", native),
        })
    }

    fn request(op: &str, key: &SubscriptionKey) -> ExchangeResult<String> {
        Ok(serde_json::json!({ "op": op, "args": [Self::topic(key)?] }).to_string())
    }

    fn on_ticker(&self, kind: &str, ts: u64, data: serde_json::Value) -> ExchangeResult<Vec<StreamFrame>> {
        let row: BybitTicker = serde_json::from_value(data)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;
        let mut state = self.state();
        let merged = if kind == "delta" {
            let Some(existing) = state.tickers.get_mut(&row.symbol) else {
                return Ok(vec![StreamFrame::Ignored]);
            };
            existing.merge(row);
            existing.clone()
        } else {
            state.tickers.insert(row.symbol.clone(), row.clone());
            row
        };
        drop(state);
        let ticker = merged.to_ticker(ts)?;
        Ok(vec![StreamFrame::Data(
            SubscriptionKey::new(SubscriptionType::Ticker, &ticker.symbol),
            StreamMessage::Ticker(ticker),
        )])
    }

    fn on_book(&self, kind: &str, ts: u64, data: serde_json::Value) -> ExchangeResult<Vec<StreamFrame>> {
        let raw: BybitBook = serde_json::from_value(data)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;
        let mut state = self.state();
        let book = if kind == "delta" {
            let Some(local) = state.books.get_mut(&raw.symbol) else {
                return Ok(vec![StreamFrame::Ignored]);
            };
            local.apply(&raw)?;
            local.to_order_book(&raw.symbol, ts)
        } else {
            let local = LocalBook::from_snapshot(&raw)?;
            let book = local.to_order_book(&raw.symbol, ts);
            state.books.insert(raw.symbol.clone(), local);
            book
        };
        Ok(vec![StreamFrame::Data(
            SubscriptionKey::new(SubscriptionType::OrderBook, &book.symbol),
            StreamMessage::OrderBook(book),
        )])
    }

    fn on_trades(data: serde_json::Value) -> ExchangeResult<Vec<StreamFrame>> {
        let rows: Vec<BybitWsTrade> = serde_json::from_value(data)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;
        rows.iter()
            .map(|row| {
                let trade = row.to_trade()?;
                Ok(StreamFrame::Data(
                    SubscriptionKey::new(SubscriptionType::Trades, &trade.symbol),
                    StreamMessage::Trade(trade),
                ))
            })
            .collect()
    }
}

impl StreamProtocol for BybitStream {
    fn exchange(&self) -> &'static str {
        EXCHANGE
    }

    fn subscribe_frame(&self, key: &SubscriptionKey) -> ExchangeResult<String> {
        Self::request("subscribe", key)
    }

    fn unsubscribe_frame(&self, key: &SubscriptionKey) -> ExchangeResult<String> {
        // Forget merge state so a later resubscribe starts from a snapshot
        if let Ok(native) = to_concatenated(&key.symbol) {
            let mut state = self.state();
            match key.kind {
                SubscriptionType::Ticker => {
                    state.tickers.remove(&native);
                }
                SubscriptionType::OrderBook => {
                    state.books.remove(&native);
                }
                SubscriptionType::Trades => {}
            }
        }
        Self::request("unsubscribe", key)
    }

    fn ping_frame(&self) -> Message {
        Message::Text(r#"{"op":"ping"}"#.to_string())
    }

    fn parse(&self, text: &str) -> Vec<StreamFrame> {
        let message: BybitWsMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => return vec![StreamFrame::Ignored],
        };

        if let Some(op) = message.op.as_deref() {
            return match (op, message.success) {
                ("pong", _) | ("ping", Some(true)) => vec![StreamFrame::Pong],
                (_, Some(false)) => vec![StreamFrame::Error(format!(
                    "{} failed: {}",
                    op,
                    message.ret_msg.unwrap_or_default()
                ))],
                _ => vec![StreamFrame::Ignored],
            };
        }

        let (Some(topic), Some(data)) = (message.topic.as_deref(), message.data) else {
            return vec![StreamFrame::Ignored];
        };
        let kind = message.kind.as_deref().unwrap_or("snapshot");
        let ts = if message.ts == 0 { current_time_ms() } else { message.ts };

        let frames = if topic.starts_with("tickers.") {
            self.on_ticker(kind, ts, data)
        } else if topic.starts_with("orderbook.") {
            self.on_book(kind, ts, data)
        } else if topic.starts_with("publicTrade.") {
            Self::on_trades(data)
        } else {
            Ok(vec![StreamFrame::Ignored])
        };
        frames.unwrap_or_else(|e| vec![StreamFrame::Error(e.to_string())])
    }

    fn reset(&self) {
        let mut state = self.state();
        state.books.clear();
        state.tickers.clear();
    }
}

// =============================================================================
// Bybit Adapter
// =============================================================================

pub struct BybitAdapter {
    config: BybitConfig,
    http_client: reqwest::Client,
    credentials: Option<Credentials>,
    connected: bool,
    stream: StreamClient<BybitStream>,
    events: broadcast::Sender<AdapterEvent>,
    last_rest_ok: Arc<AtomicU64>,
}

impl BybitAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        let (events, _) = broadcast::channel(ADAPTER_EVENT_CAPACITY);
        Self {
            config: BybitConfig::new(settings),
            http_client: create_http_client(EXCHANGE),
            credentials: None,
            connected: false,
            stream: StreamClient::new(BybitStream::new()),
            events,
            last_rest_ok: Arc::new(AtomicU64::new(0)),
        }
    }

    fn credentials(&self) -> ExchangeResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::NotConnected(EXCHANGE.to_string()))
    }

    /// Unwrap the `{retCode, retMsg, result}` envelope
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ExchangeResult<(T, u64)> {
        let (status, body) = read_body(response).await?;
        if status_overrides_body(status) {
            return Err(map_http_status(EXCHANGE, status, &body));
        }
        let envelope: BybitResponse<serde_json::Value> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(map_http_status(EXCHANGE, status, &body)),
            Err(e) => {
                return Err(ExchangeError::InvalidResponse(format!(
                    "{}: failed to decode response: {}",
                    EXCHANGE, e
                )))
            }
        };
        if envelope.ret_code != 0 {
            return Err(map_error_code(envelope.ret_code, &envelope.ret_msg));
        }

        self.last_rest_ok.store(current_time_ms(), Ordering::Relaxed);
        let result = envelope.result.unwrap_or(serde_json::Value::Null);
        let parsed = serde_json::from_value(result).map_err(|e| {
            ExchangeError::InvalidResponse(format!("{}: unexpected result: {}", EXCHANGE, e))
        })?;
        Ok((parsed, envelope.time))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<(T, u64)> {
        let url = format!("{}{}?{}", self.config.rest_url(), path, encode_query(params));
        let response = self.http_client.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let query = encode_query(params);
        let url = format!("{}{}?{}", self.config.rest_url(), path, query);
        self.send_signed(Method::GET, url, query, None).await
    }

    async fn signed_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> ExchangeResult<T> {
        let body = body.to_string();
        let url = format!("{}{}", self.config.rest_url(), path);
        self.send_signed(Method::POST, url, body.clone(), Some(body)).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        payload: String,
        body: Option<String>,
    ) -> ExchangeResult<T> {
        let credentials = self.credentials()?;
        let timestamp = current_time_ms();
        let recv_window = self.config.settings.recv_window_ms;
        let signature = sign_payload(
            &credentials.api_secret,
            timestamp,
            &credentials.api_key,
            recv_window,
            &payload,
        );

        tracing::debug!(exchange = EXCHANGE, method = %method, url = %url, "Signed request");
        let mut request = self
            .http_client
            .request(method, &url)
            .header("X-BAPI-API-KEY", &credentials.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", recv_window.to_string())
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-SIGN-TYPE", "2");
        if let Some(body) = body {
            request = request.header("Content-Type", "application/json").body(body);
        }
        let response = request.send().await?;
        self.handle_response(response).await.map(|(value, _)| value)
    }

    async fn wallet(&self) -> ExchangeResult<BybitWallet> {
        let wallets: BybitList<BybitWallet> = self
            .signed_get(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
            )
            .await?;
        wallets
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("{}: empty wallet list", EXCHANGE)))
    }

    fn order_id_field(order_id: &str) -> &'static str {
        // Exchange ids are UUIDs with dashes; our client ids are simple UUIDs
        if order_id.contains('-') {
            "orderId"
        } else {
            "orderLinkId"
        }
    }

    /// Order by id from open orders, then history
    async fn lookup_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let params = [
            ("category", CATEGORY.to_string()),
            ("symbol", to_concatenated(symbol)?),
            (Self::order_id_field(order_id), order_id.to_string()),
        ];
        for path in ["/v5/order/realtime", "/v5/order/history"] {
            let rows: BybitList<BybitOrder> = self.signed_get(path, &params).await?;
            if let Some(row) = rows.list.first() {
                return row.to_order();
            }
        }
        Err(ExchangeError::OrderNotFound(format!("{}: {}", EXCHANGE, order_id)))
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    async fn connect(&mut self, credentials: &Credentials) -> ExchangeResult<()> {
        self.validate_credentials(credentials)?;
        self.config.sandbox = credentials.sandbox;
        self.credentials = Some(credentials.clone());

        if let Err(e) = self.wallet().await {
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
        tracing::info!(exchange = EXCHANGE, testnet = credentials.sandbox, "Connected");
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
        let wallet = self.wallet().await?;
        Ok(AccountInfo {
            exchange: EXCHANGE.to_string(),
            total_equity: parse_num(&wallet.total_equity, "totalEquity")?,
            available_balance: parse_num(&wallet.total_available_balance, "totalAvailableBalance")
                .unwrap_or(0.0),
            unrealized_pnl: parse_num(&wallet.total_perp_upl, "totalPerpUPL").unwrap_or(0.0),
            balances: wallet.balances()?,
            timestamp: current_time_ms(),
        })
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<Balance>> {
        self.wallet().await?.balances()
    }

    async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Position>> {
        let mut params = vec![("category", CATEGORY.to_string())];
        match symbol {
            Some(symbol) => params.push(("symbol", to_concatenated(symbol)?)),
            None => params.push(("settleCoin", SETTLE_COIN.to_string())),
        }
        let rows: BybitList<BybitPosition> = self.signed_get("/v5/position/list", &params).await?;

        let mut positions = Vec::new();
        for row in &rows.list {
            if let Some(position) = row.to_position()? {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": to_concatenated(symbol)?,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        match self
            .signed_post::<serde_json::Value>("/v5/position/set-leverage", body)
            .await
        {
            Ok(_) => {}
            Err(ExchangeError::InvalidOrder(msg))
                if msg.contains(&LEVERAGE_NOT_MODIFIED.to_string()) =>
            {
                tracing::debug!(exchange = EXCHANGE, symbol = symbol, "Leverage already set");
            }
            Err(e) => return Err(e),
        }
        tracing::info!(exchange = EXCHANGE, symbol = symbol, leverage = leverage, "Leverage set");
        Ok(())
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let params = [
            ("category", CATEGORY.to_string()),
            ("symbol", to_concatenated(symbol)?),
        ];
        let (rows, time): (BybitList<BybitTicker>, u64) =
            self.public_get("/v5/market/tickers", &params).await?;
        let row = rows.list.into_iter().next().ok_or_else(|| {
            ExchangeError::InvalidResponse(format!("{}: no ticker for {}", EXCHANGE, symbol))
        })?;
        row.to_ticker(if time == 0 { current_time_ms() } else { time })
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        let params = [
            ("category", CATEGORY.to_string()),
            ("symbol", to_concatenated(symbol)?),
            ("limit", depth.clamp(1, MAX_BOOK_DEPTH).to_string()),
        ];
        let (raw, _): (BybitBook, u64) = self.public_get("/v5/market/orderbook", &params).await?;
        raw.to_order_book(depth)
    }

    async fn get_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<Trade>> {
        let params = [
            ("category", CATEGORY.to_string()),
            ("symbol", to_concatenated(symbol)?),
            ("limit", limit.clamp(1, MAX_TRADES_LIMIT).to_string()),
        ];
        let (rows, _): (BybitList<BybitTrade>, u64) =
            self.public_get("/v5/market/recent-trade", &params).await?;
        rows.list.iter().map(BybitTrade::to_trade).collect()
    }

    async fn create_order(&self, request: OrderRequest) -> ExchangeResult<Order> {
        request.validate()?;
        let settings = &self.config.settings;
        let client_order_id = request.client_order_id_or_new();

        let mut body = serde_json::json!({
            "category": CATEGORY,
            "symbol": to_concatenated(&request.symbol)?,
            "side": match request.side {
                OrderSide::Buy => "Buy",
                OrderSide::Sell => "Sell",
            },
            "orderType": match request.order_type {
                OrderType::Market => "Market",
                OrderType::Limit => "Limit",
            },
            "qty": format_amount(request.amount, settings.amount_precision),
            "orderLinkId": client_order_id,
        });
        if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
            body["price"] = serde_json::Value::String(format_price(price, settings.price_precision));
            body["timeInForce"] = serde_json::Value::String(
                match request.time_in_force {
                    TimeInForce::Gtc => "GTC",
                    TimeInForce::Ioc => "IOC",
                    TimeInForce::Fok => "FOK",
                }
                .to_string(),
            );
        }
        if request.reduce_only {
            body["reduceOnly"] = serde_json::Value::Bool(true);
        }

        let ack: BybitOrderAck = self.signed_post("/v5/order/create", body).await?;
        tracing::info!(
            exchange = EXCHANGE,
            order_id = %ack.order_id,
            symbol = %request.symbol,
            side = %request.side,
            amount = request.amount,
            "Order placed"
        );

        match self.lookup_order(&ack.order_id, &request.symbol).await {
            Ok(order) => Ok(order),
            Err(e) => {
                tracing::warn!(exchange = EXCHANGE, order_id = %ack.order_id, error = %e, "Order lookup after placement failed");
                Ok(Order {
                    id: ack.order_id,
                    client_order_id: Some(ack.order_link_id).filter(|s| !s.is_empty()),
                    symbol: request.symbol.clone(),
                    side: request.side,
                    order_type: request.order_type,
                    status: OrderStatus::Open,
                    price: request.price,
                    average_price: None,
                    amount: request.amount,
                    filled: 0.0,
                    remaining: request.amount,
                    timestamp: current_time_ms(),
                })
            }
        }
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let mut order = self.lookup_order(order_id, symbol).await?;
        let mut body = serde_json::json!({
            "category": CATEGORY,
            "symbol": to_concatenated(symbol)?,
        });
        body[Self::order_id_field(order_id)] = serde_json::Value::String(order_id.to_string());
        let _: BybitOrderAck = self.signed_post("/v5/order/cancel", body).await?;
        order.status = OrderStatus::Canceled;
        order.timestamp = current_time_ms();
        Ok(order)
    }

    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        self.lookup_order(order_id, symbol).await
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        let mut params = vec![("category", CATEGORY.to_string())];
        match symbol {
            Some(symbol) => params.push(("symbol", to_concatenated(symbol)?)),
            None => params.push(("settleCoin", SETTLE_COIN.to_string())),
        }
        let rows: BybitList<BybitOrder> = self.signed_get("/v5/order/realtime", &params).await?;
        rows.list.iter().map(BybitOrder::to_order).collect()
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
