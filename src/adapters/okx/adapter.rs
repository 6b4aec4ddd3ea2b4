//! OKX Adapter Implementation
//!
//! v5 API for USDT-margined perpetual swaps. Requests are signed with a
//! base64 HMAC-SHA256 over `timestamp + method + path + body` and carry the
//! account passphrase. Order sizes (`sz`) are in contracts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::normalize::{format_amount, format_price};
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

use super::config::{from_inst_id, to_inst_id, OkxConfig, INST_TYPE, MAX_BOOK_DEPTH, MAX_TRADES_LIMIT};
use super::types::{
    OkxAccountBalance, OkxBook, OkxItemStatus, OkxOrder, OkxOrderAck, OkxPosition, OkxResponse,
    OkxTicker, OkxTrade, OkxWsMessage,
};

pub const EXCHANGE: &str = "okx";

// =============================================================================
// Signing & error codes
// =============================================================================

/// ISO-8601 UTC timestamp with milliseconds, as OKX expects
pub fn okx_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// base64(HMAC-SHA256(secret, timestamp + method + request_path + body))
pub fn sign_request(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> String {
    let message = format!("{}{}{}{}", timestamp, method, path, body);
    let mac = hmac_sha256::HMAC::mac(message.as_bytes(), secret.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac)
}

/// Map an OKX error code (envelope `code` or per-item `sCode`)
pub fn map_error_code(code: &str, msg: &str) -> ExchangeError {
    let detail = format!("{} {}: {}", EXCHANGE, code, msg);
    let Ok(numeric) = code.parse::<u32>() else {
        return ExchangeError::InvalidResponse(detail);
    };
    match numeric {
        50100..=50101 | 50103..=50107 | 50111..=50114 => ExchangeError::Authentication(detail),
        50011 | 50061 => ExchangeError::RateLimitExceeded(detail),
        51008 | 51131 => ExchangeError::InsufficientFunds(detail),
        51400 | 51401 | 51603 => ExchangeError::OrderNotFound(detail),
        50001 | 50004 | 50013 | 50026 | 50102 => ExchangeError::Network(detail),
        51000..=51999 | 50014 => ExchangeError::InvalidOrder(detail),
        _ => ExchangeError::InvalidResponse(detail),
    }
}

// =============================================================================
// Stream protocol
// =============================================================================

pub struct OkxStream;

impl OkxStream {
    fn channel(kind: SubscriptionType) -> &'static str {
        match kind {
            SubscriptionType::Ticker => "tickers",
            SubscriptionType::OrderBook => "books5",
            SubscriptionType::Trades => "trades",
        }
    }

    fn request(op: &str, key: &SubscriptionKey) -> ExchangeResult<String> {
        Ok(serde_json::json!({
            "op": op,
            "args": [{ "channel": Self::channel(key.kind), "instId": to_inst_id(&key.symbol)? }],
        })
        .to_string())
    }

    fn data_frames(channel: &str, inst_id: &str, data: serde_json::Value) -> Vec<StreamFrame> {
        let symbol = from_inst_id(inst_id);
        let frames: ExchangeResult<Vec<StreamFrame>> = match channel {
            "tickers" => serde_json::from_value::<Vec<OkxTicker>>(data)
                .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
                .and_then(|rows| {
                    rows.iter()
                        .map(|t| {
                            let ticker = t.to_ticker()?;
                            Ok(StreamFrame::Data(
                                SubscriptionKey::new(SubscriptionType::Ticker, &symbol),
                                StreamMessage::Ticker(ticker),
                            ))
                        })
                        .collect()
                }),
            "books5" => serde_json::from_value::<Vec<OkxBook>>(data)
                .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
                .and_then(|rows| {
                    rows.iter()
                        .map(|b| {
                            let book = b.to_order_book(&symbol, usize::MAX)?;
                            Ok(StreamFrame::Data(
                                SubscriptionKey::new(SubscriptionType::OrderBook, &symbol),
                                StreamMessage::OrderBook(book),
                            ))
                        })
                        .collect()
                }),
            "trades" => serde_json::from_value::<Vec<OkxTrade>>(data)
                .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
                .and_then(|rows| {
                    rows.iter()
                        .map(|t| {
                            let trade = t.to_trade()?;
                            Ok(StreamFrame::Data(
                                SubscriptionKey::new(SubscriptionType::Trades, &symbol),
                                StreamMessage::Trade(trade),
                            ))
                        })
                        .collect()
                }),
            _ => Ok(vec![StreamFrame::Ignored]),
        };
        frames.unwrap_or_else(|e| vec![StreamFrame::Error(e.to_string())])
    }
}

impl StreamProtocol for OkxStream {
    fn exchange(&self) -> &'static str {
        EXCHANGE
    }

    fn subscribe_frame(&self, key: &SubscriptionKey) -> ExchangeResult<String> {
        Self::request("subscribe", key)
    }

    fn unsubscribe_frame(&self, key: &SubscriptionKey) -> ExchangeResult<String> {
        Self::request("unsubscribe", key)
    }

    fn ping_frame(&self) -> Message {
        Message::Text("ping".to_string())
    }

    fn parse(&self, text: &str) -> Vec<StreamFrame> {
        if text == "pong" {
            return vec![StreamFrame::Pong];
        }
        let message: OkxWsMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => return vec![StreamFrame::Ignored],
        };
        if message.event.as_deref() == Some("error") {
            return vec![StreamFrame::Error(format!(
                "{}: {}",
                message.code.unwrap_or_default(),
                message.msg.unwrap_or_default()
            ))];
        }
        match (message.arg, message.data) {
            (Some(arg), Some(data)) => Self::data_frames(&arg.channel, &arg.inst_id, data),
            _ => vec![StreamFrame::Ignored],
        }
    }
}

// =============================================================================
// OKX Adapter
// =============================================================================

pub struct OkxAdapter {
    config: OkxConfig,
    http_client: reqwest::Client,
    credentials: Option<Credentials>,
    connected: bool,
    stream: StreamClient<OkxStream>,
    events: broadcast::Sender<AdapterEvent>,
    last_rest_ok: Arc<AtomicU64>,
}

impl OkxAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        let (events, _) = broadcast::channel(ADAPTER_EVENT_CAPACITY);
        Self {
            config: OkxConfig::new(settings),
            http_client: create_http_client(EXCHANGE),
            credentials: None,
            connected: false,
            stream: StreamClient::new(OkxStream),
            events,
            last_rest_ok: Arc::new(AtomicU64::new(0)),
        }
    }

    fn credentials(&self) -> ExchangeResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::NotConnected(EXCHANGE.to_string()))
    }

    /// Unwrap the `{code, msg, data}` envelope, surfacing per-item `sCode`s
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ExchangeResult<Vec<T>> {
        let (status, body) = read_body(response).await?;
        if status_overrides_body(status) {
            return Err(map_http_status(EXCHANGE, status, &body));
        }
        let envelope: OkxResponse<serde_json::Value> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(map_http_status(EXCHANGE, status, &body)),
            Err(e) => {
                return Err(ExchangeError::InvalidResponse(format!(
                    "{}: failed to decode response: {}",
                    EXCHANGE, e
                )))
            }
        };

        if envelope.code != "0" {
            let item_error = envelope
                .data
                .iter()
                .filter_map(|item| serde_json::from_value::<OkxItemStatus>(item.clone()).ok())
                .find_map(|item| match item.s_code {
                    Some(code) if code != "0" => Some((code, item.s_msg.unwrap_or_default())),
                    _ => None,
                });
            return Err(match item_error {
                Some((code, msg)) => map_error_code(&code, &msg),
                None => map_error_code(&envelope.code, &envelope.msg),
            });
        }

        self.last_rest_ok.store(current_time_ms(), Ordering::Relaxed);
        envelope
            .data
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|e| {
                    ExchangeError::InvalidResponse(format!("{}: unexpected row: {}", EXCHANGE, e))
                })
            })
            .collect()
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<Vec<T>> {
        let url = format!("{}{}?{}", self.config.rest_url(), path, encode_query(params));
        let response = self.http_client.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> ExchangeResult<Vec<T>> {
        let credentials = self.credentials()?;
        let request_path = if params.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, encode_query(params))
        };
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let timestamp = okx_timestamp();
        let signature = sign_request(
            &credentials.api_secret,
            &timestamp,
            method.as_str(),
            &request_path,
            &body,
        );

        tracing::debug!(exchange = EXCHANGE, method = %method, path = path, "Signed request");
        let mut request = self
            .http_client
            .request(method, format!("{}{}", self.config.rest_url(), request_path))
            .header("OK-ACCESS-KEY", &credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header(
                "OK-ACCESS-PASSPHRASE",
                credentials.passphrase.as_deref().unwrap_or_default(),
            )
            .header("Content-Type", "application/json");
        if self.config.sandbox {
            request = request.header("x-simulated-trading", "1");
        }
        if !body.is_empty() {
            request = request.body(body);
        }
        let response = request.send().await?;
        self.handle_response(response).await
    }

    async fn account_balance(&self) -> ExchangeResult<OkxAccountBalance> {
        let rows: Vec<OkxAccountBalance> = self
            .signed_request(Method::GET, "/api/v5/account/balance", &[], None)
            .await?;
        first_row(rows, "account balance")
    }

    fn order_id_field(order_id: &str) -> &'static str {
        if order_id.chars().all(|c| c.is_ascii_digit()) {
            "ordId"
        } else {
            "clOrdId"
        }
    }
}

fn first_row<T>(rows: Vec<T>, what: &str) -> ExchangeResult<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("{}: empty {}", EXCHANGE, what)))
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    async fn connect(&mut self, credentials: &Credentials) -> ExchangeResult<()> {
        self.validate_credentials(credentials)?;
        self.config.sandbox = credentials.sandbox;
        self.credentials = Some(credentials.clone());

        if let Err(e) = self.account_balance().await {
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
        tracing::info!(exchange = EXCHANGE, demo = credentials.sandbox, "Connected");
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

    fn validate_credentials(&self, credentials: &Credentials) -> ExchangeResult<()> {
        if credentials.api_key.trim().is_empty() || credentials.api_secret.trim().is_empty() {
            return Err(ExchangeError::Authentication(
                "okx: api_key and api_secret are required".into(),
            ));
        }
        match credentials.passphrase.as_deref() {
            Some(p) if !p.trim().is_empty() => Ok(()),
            _ => Err(ExchangeError::Authentication(
                "okx: passphrase is required".into(),
            )),
        }
    }

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo> {
        let account = self.account_balance().await?;
        let balances = account.balances()?;
        let available_balance = balances
            .iter()
            .find(|b| b.asset == "USDT")
            .map(|b| b.free)
            .unwrap_or(0.0);
        let unrealized_pnl = balances.iter().map(|b| b.unrealized_pnl).sum();

        Ok(AccountInfo {
            exchange: EXCHANGE.to_string(),
            total_equity: account.total_equity()?,
            available_balance,
            unrealized_pnl,
            timestamp: account.timestamp(),
            balances,
        })
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<Balance>> {
        self.account_balance().await?.balances()
    }

    async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Position>> {
        let mut params = vec![("instType", INST_TYPE.to_string())];
        if let Some(symbol) = symbol {
            params.push(("instId", to_inst_id(symbol)?));
        }
        let rows: Vec<OkxPosition> = self
            .signed_request(Method::GET, "/api/v5/account/positions", &params, None)
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
        let body = serde_json::json!({
            "instId": to_inst_id(symbol)?,
            "lever": leverage.to_string(),
            "mgnMode": "cross",
        });
        let _: Vec<serde_json::Value> = self
            .signed_request(Method::POST, "/api/v5/account/set-leverage", &[], Some(body))
            .await?;
        tracing::info!(exchange = EXCHANGE, symbol = symbol, leverage = leverage, "Leverage set");
        Ok(())
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let rows: Vec<OkxTicker> = self
            .public_get("/api/v5/market/ticker", &[("instId", to_inst_id(symbol)?)])
            .await?;
        first_row(rows, "ticker")?.to_ticker()
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        let params = [
            ("instId", to_inst_id(symbol)?),
            ("sz", depth.clamp(1, MAX_BOOK_DEPTH).to_string()),
        ];
        let rows: Vec<OkxBook> = self.public_get("/api/v5/market/books", &params).await?;
        first_row(rows, "order book")?.to_order_book(symbol, depth)
    }

    async fn get_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<Trade>> {
        let params = [
            ("instId", to_inst_id(symbol)?),
            ("limit", limit.clamp(1, MAX_TRADES_LIMIT).to_string()),
        ];
        let rows: Vec<OkxTrade> = self.public_get("/api/v5/market/trades", &params).await?;
        rows.iter().map(OkxTrade::to_trade).collect()
    }

    async fn create_order(&self, request: OrderRequest) -> ExchangeResult<Order> {
        request.validate()?;
        let settings = &self.config.settings;
        let inst_id = to_inst_id(&request.symbol)?;
        let client_order_id = request.client_order_id_or_new();

        let ord_type = match (request.order_type, request.time_in_force) {
            (OrderType::Market, _) => "market",
            (OrderType::Limit, TimeInForce::Gtc) => "limit",
            (OrderType::Limit, TimeInForce::Ioc) => "ioc",
            (OrderType::Limit, TimeInForce::Fok) => "fok",
        };
        let mut body = serde_json::json!({
            "instId": inst_id,
            "tdMode": "cross",
            "side": request.side.to_string(),
            "ordType": ord_type,
            "sz": format_amount(request.amount, settings.amount_precision),
            "clOrdId": client_order_id,
        });
        if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
            body["px"] = serde_json::Value::String(format_price(price, settings.price_precision));
        }
        if request.reduce_only {
            body["reduceOnly"] = serde_json::Value::Bool(true);
        }

        let acks: Vec<OkxOrderAck> = self
            .signed_request(Method::POST, "/api/v5/trade/order", &[], Some(body))
            .await?;
        let ack = first_row(acks, "order ack")?;
        tracing::info!(
            exchange = EXCHANGE,
            order_id = %ack.ord_id,
            symbol = %request.symbol,
            side = %request.side,
            amount = request.amount,
            "Order placed"
        );

        match self.get_order(&ack.ord_id, &request.symbol).await {
            Ok(order) => Ok(order),
            Err(e) => {
                tracing::warn!(exchange = EXCHANGE, order_id = %ack.ord_id, error = %e, "Order lookup after placement failed");
                Ok(Order {
                    id: ack.ord_id,
                    client_order_id: ack.cl_ord_id.or(Some(client_order_id)),
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
        let mut order = self.get_order(order_id, symbol).await?;
        let mut body = serde_json::json!({ "instId": to_inst_id(symbol)? });
        body[Self::order_id_field(order_id)] = serde_json::Value::String(order_id.to_string());
        let _: Vec<OkxOrderAck> = self
            .signed_request(Method::POST, "/api/v5/trade/cancel-order", &[], Some(body))
            .await?;
        order.status = OrderStatus::Canceled;
        order.timestamp = current_time_ms();
        Ok(order)
    }

    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let params = [
            ("instId", to_inst_id(symbol)?),
            (Self::order_id_field(order_id), order_id.to_string()),
        ];
        let rows: Vec<OkxOrder> = self
            .signed_request(Method::GET, "/api/v5/trade/order", &params, None)
            .await?;
        first_row(rows, "order")
            .map_err(|_| ExchangeError::OrderNotFound(format!("{}: {}", EXCHANGE, order_id)))?
            .to_order()
    }

    async fn get_open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        let mut params = vec![("instType", INST_TYPE.to_string())];
        if let Some(symbol) = symbol {
            params.push(("instId", to_inst_id(symbol)?));
        }
        let rows: Vec<OkxOrder> = self
            .signed_request(Method::GET, "/api/v5/trade/orders-pending", &params, None)
            .await?;
        rows.iter().map(OkxOrder::to_order).collect()
    }

    async fn subscribe(
        &mut self,
        kind: SubscriptionType,
        symbol: &str,
        callback: StreamCallback,
    ) -> ExchangeResult<bool> {
        to_inst_id(symbol)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const BALANCE_BODY: &str = r#"{"code":"0","msg":"","data":[{"totalEq":"10500.5","uTime":"1706000000000",
        "details":[{"ccy":"USDT","eq":"10000","availBal":"9000","frozenBal":"1000","upl":"25.5"},
                   {"ccy":"BTC","eq":"0.01","availBal":"0.01","frozenBal":"0","upl":"0"}]}]}"#;

    fn creds() -> Credentials {
        Credentials::new("key", "secret").with_passphrase("pass")
    }

    async fn connected_adapter(server: &mut mockito::ServerGuard) -> OkxAdapter {
        server
            .mock("GET", "/api/v5/account/balance")
            .match_header("OK-ACCESS-KEY", "key")
            .match_header("OK-ACCESS-PASSPHRASE", "pass")
            .with_status(200)
            .with_body(BALANCE_BODY)
            .create_async()
            .await;
        let mut adapter = OkxAdapter::new(AdapterSettings::rest_only(server.url()));
        adapter.connect(&creds()).await.unwrap();
        adapter
    }

    #[test]
    fn test_sign_request_known_vector() {
        let sig = sign_request(
            "22582BD0CFF14C41EDBF1AB98506286D",
            "2020-12-08T09:08:57.715Z",
            "GET",
            "/api/v5/account/balance?ccy=BTC",
            "",
        );
        assert_eq!(sig, "HiZhvSfMtWJA3uUIVXV3a/bSXNPCWvYFXoGCVS8V4zY=");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = okx_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2020-12-08T09:08:57.715Z".len());
    }

    #[test]
    fn test_passphrase_required() {
        let adapter = OkxAdapter::new(AdapterSettings::default());
        assert!(adapter.validate_credentials(&creds()).is_ok());
        let err = adapter
            .validate_credentials(&Credentials::new("key", "secret"))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_code_mapping() {
        assert!(matches!(map_error_code("50111", ""), ExchangeError::Authentication(_)));
        assert!(matches!(map_error_code("50105", ""), ExchangeError::Authentication(_)));
        assert!(matches!(map_error_code("50011", ""), ExchangeError::RateLimitExceeded(_)));
        assert!(matches!(map_error_code("51008", ""), ExchangeError::InsufficientFunds(_)));
        assert!(matches!(map_error_code("51603", ""), ExchangeError::OrderNotFound(_)));
        assert!(matches!(map_error_code("51000", ""), ExchangeError::InvalidOrder(_)));
        assert!(matches!(map_error_code("50001", ""), ExchangeError::Network(_)));
        assert!(matches!(map_error_code("abc", ""), ExchangeError::InvalidResponse(_)));
    }

    #[test]
    fn test_stream_parse() {
        let proto = OkxStream;
        assert_eq!(proto.parse("pong"), vec![StreamFrame::Pong]);
        assert_eq!(proto.ping_frame(), Message::Text("ping".into()));

        let frame: serde_json::Value = serde_json::from_str(
            &proto
                .subscribe_frame(&SubscriptionKey::new(SubscriptionType::Trades, "BTC/USDT"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(frame["args"][0]["channel"], "trades");
        assert_eq!(frame["args"][0]["instId"], "BTC-USDT-SWAP");

        let push = r#"{"arg":{"channel":"books5","instId":"ETH-USDT-SWAP"},"data":[{
            "asks":[["2000.5","10","0","2"]],"bids":[["2000.4","4","0","1"]],"instId":"ETH-USDT-SWAP","ts":"1706000000000","seqId":1}]}"#;
        match &proto.parse(push)[0] {
            StreamFrame::Data(key, StreamMessage::OrderBook(book)) => {
                assert_eq!(key.symbol, "ETH/USDT");
                assert_eq!(book.best_ask(), Some(2000.5));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = r#"{"event":"error","code":"60012","msg":"Invalid request"}"#;
        assert!(matches!(proto.parse(err)[0], StreamFrame::Error(_)));
        let ack = r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT-SWAP"}}"#;
        assert_eq!(proto.parse(ack), vec![StreamFrame::Ignored]);
    }

    #[tokio::test]
    async fn test_account_info() {
        let mut server = mockito::Server::new_async().await;
        let adapter = connected_adapter(&mut server).await;
        let info = adapter.get_account_info().await.unwrap();
        assert_eq!(info.total_equity, 10500.5);
        assert_eq!(info.available_balance, 9000.0);
        assert_eq!(info.unrealized_pnl, 25.5);
        assert_eq!(info.balances.len(), 2);
        assert_eq!(info.timestamp, 1706000000000);
    }

    #[tokio::test]
    async fn test_demo_header_sent_in_sandbox() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v5/account/balance")
            .match_header("x-simulated-trading", "1")
            .with_status(200)
            .with_body(BALANCE_BODY)
            .create_async()
            .await;
        let mut adapter = OkxAdapter::new(AdapterSettings::rest_only(server.url()));
        adapter.connect(&creds().sandbox(true)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_item_error_code_wins() {
        let mut server = mockito::Server::new_async().await;
        let adapter = connected_adapter(&mut server).await;
        server
            .mock("POST", "/api/v5/trade/order")
            .with_status(200)
            .with_body(
                r#"{"code":"1","msg":"Operation failed.","data":[{"ordId":"","clOrdId":"x",
                "sCode":"51008","sMsg":"Order failed. Insufficient USDT balance in account."}]}"#,
            )
            .create_async()
            .await;

        let err = adapter
            .create_order(OrderRequest::market("BTC/USDT", OrderSide::Buy, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientFunds(_)));
    }

    #[tokio::test]
    async fn test_cancel_order_reports_canceled() {
        let mut server = mockito::Server::new_async().await;
        let adapter = connected_adapter(&mut server).await;
        server
            .mock("GET", "/api/v5/trade/order")
            .match_query(Matcher::UrlEncoded("ordId".into(), "555".into()))
            .with_status(200)
            .with_body(
                r#"{"code":"0","msg":"","data":[{"ordId":"555","clOrdId":"c1","instId":"BTC-USDT-SWAP",
                "side":"buy","ordType":"limit","state":"live","px":"40000","avgPx":"","sz":"2",
                "accFillSz":"0.5","uTime":"1706000000000"}]}"#,
            )
            .create_async()
            .await;
        server
            .mock("POST", "/api/v5/trade/cancel-order")
            .match_body(Matcher::PartialJsonString(r#"{"ordId":"555"}"#.into()))
            .with_status(200)
            .with_body(r#"{"code":"0","msg":"","data":[{"ordId":"555","clOrdId":"c1","sCode":"0","sMsg":""}]}"#)
            .create_async()
            .await;

        let order = adapter.cancel_order("555", "BTC/USDT").await.unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
        assert_eq!(order.filled, 0.5);
        assert_eq!(order.remaining, 1.5);
    }

    #[tokio::test]
    async fn test_rate_limit_status() {
        let mut server = mockito::Server::new_async().await;
        let adapter = connected_adapter(&mut server).await;
        server
            .mock("GET", "/api/v5/market/ticker")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(r#"{"code":"50011","msg":"Too Many Requests"}"#)
            .create_async()
            .await;
        let err = adapter.get_ticker("BTC/USDT").await.unwrap_err();
        assert!(matches!(err, ExchangeError::RateLimitExceeded(_)));
    }
}
