//! Test utilities for adapter consumers
//!
//! `TestMockAdapter` implements `ExchangeAdapter` in memory. Behaviour is
//! steered through a shared `MockControl`, so a test can keep a handle after
//! the adapter has been moved into a `ConnectionManager`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::manager::ConnectionManager;
use crate::adapters::settings::AdapterSettings;
use crate::adapters::shared::{Registration, SubscriptionRegistry};
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::{
    current_time_ms, AccountInfo, AdapterEvent, Balance, Credentials, MarginMode, Order,
    OrderBook, OrderBookLevel, OrderRequest, OrderSide, OrderStatus, OrderType, Position, PositionSide,
    StreamCallback, StreamMessage, SubscriptionKey, SubscriptionType, Ticker, Trade,
    ADAPTER_EVENT_CAPACITY,
};
use crate::config::HealthConfig;
use crate::error::AppError;

/// Knobs shared between a test and every adapter built from it
#[derive(Debug, Default)]
pub struct MockControl {
    /// Error returned by every `connect` while set
    pub connect_error: Mutex<Option<ExchangeError>>,
    /// Every query fails with `Network` while set
    pub fail_queries: AtomicBool,
    /// `last_heartbeat` reports an ancient timestamp while set
    pub frozen_heartbeat: AtomicBool,
    /// Market-data socket reported dead while REST keeps working
    pub ws_down: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub orders_placed: AtomicUsize,
}

impl MockControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_connect_with(&self, error: Option<ExchangeError>) {
        *self.connect_error.lock().unwrap() = error;
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct TestMockAdapter {
    name: &'static str,
    control: Arc<MockControl>,
    connected: bool,
    subscriptions: SubscriptionRegistry,
    stream_subscribe_calls: usize,
    events: broadcast::Sender<AdapterEvent>,
}

impl TestMockAdapter {
    pub fn new(name: &'static str) -> Self {
        Self::with_control(name, MockControl::new())
    }

    pub fn with_control(name: &'static str, control: Arc<MockControl>) -> Self {
        let (events, _) = broadcast::channel(ADAPTER_EVENT_CAPACITY);
        Self {
            name,
            control,
            connected: false,
            subscriptions: SubscriptionRegistry::new(),
            stream_subscribe_calls: 0,
            events,
        }
    }

    /// Number of subscriptions that actually went out on the "wire"
    pub fn stream_subscribe_calls(&self) -> usize {
        self.stream_subscribe_calls
    }

    /// Deliver a message as if it had arrived on the stream
    pub fn push(&self, kind: SubscriptionType, message: StreamMessage) -> bool {
        let key = SubscriptionKey::new(kind, message.symbol());
        self.subscriptions.dispatch(&key, message)
    }

    /// Simulate the socket dropping underneath the adapter
    pub fn drop_connection(&mut self) {
        self.connected = false;
        let _ = self.events.send(AdapterEvent::Disconnected {
            exchange: self.name.to_string(),
        });
    }

    fn check(&self) -> ExchangeResult<()> {
        if !self.connected {
            return Err(ExchangeError::NotConnected(self.name.to_string()));
        }
        if self.control.fail_queries.load(Ordering::SeqCst) {
            return Err(ExchangeError::Network(format!("{}: unreachable", self.name)));
        }
        Ok(())
    }
}

/// Manager over mock adapters, one `MockControl` per known exchange name
pub fn mock_manager(
    names: &[&'static str],
    health: HealthConfig,
) -> (ConnectionManager<TestMockAdapter>, HashMap<String, Arc<MockControl>>) {
    let controls: HashMap<String, Arc<MockControl>> = names
        .iter()
        .map(|n| (n.to_string(), MockControl::new()))
        .collect();
    let known = controls.clone();
    let manager = ConnectionManager::with_factory(health, move |name: &str, _: &AdapterSettings| {
        let control = known
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("unknown exchange {}", name)))?;
        let name: &'static str = Box::leak(name.to_string().into_boxed_str());
        Ok(TestMockAdapter::with_control(name, control))
    });
    (manager, controls)
}

pub fn sample_ticker(symbol: &str, last: f64) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        last,
        bid: Some(last - 0.5),
        ask: Some(last + 0.5),
        high_24h: last * 1.05,
        low_24h: last * 0.95,
        volume_24h: 1_000.0,
        quote_volume_24h: last * 1_000.0,
        change_percent_24h: Some(1.5),
        timestamp: current_time_ms(),
    }
}

#[async_trait]
impl ExchangeAdapter for TestMockAdapter {
    async fn connect(&mut self, credentials: &Credentials) -> ExchangeResult<()> {
        self.control.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.validate_credentials(credentials)?;
        if let Some(error) = self.control.connect_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.connected = true;
        let _ = self.events.send(AdapterEvent::Connected {
            exchange: self.name.to_string(),
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> ExchangeResult<()> {
        self.subscriptions.clear();
        if std::mem::replace(&mut self.connected, false) {
            let _ = self.events.send(AdapterEvent::Disconnected {
                exchange: self.name.to_string(),
            });
        }
        Ok(())
    }

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo> {
        self.check()?;
        Ok(AccountInfo {
            exchange: self.name.to_string(),
            total_equity: 10_000.0,
            available_balance: 8_000.0,
            unrealized_pnl: 25.0,
            balances: self.get_balances().await?,
            timestamp: current_time_ms(),
        })
    }

    async fn get_balances(&self) -> ExchangeResult<Vec<Balance>> {
        self.check()?;
        Ok(vec![Balance {
            asset: "USDT".into(),
            total: 10_000.0,
            free: 8_000.0,
            used: 2_000.0,
            unrealized_pnl: 25.0,
        }])
    }

    async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Position>> {
        self.check()?;
        let position = Position {
            symbol: symbol.unwrap_or("BTC/USDT").to_string(),
            side: PositionSide::Long,
            size: 0.5,
            entry_price: 42_000.0,
            mark_price: 42_050.0,
            unrealized_pnl: 25.0,
            liquidation_price: Some(30_000.0),
            leverage: 5.0,
            margin_mode: MarginMode::Cross,
            timestamp: current_time_ms(),
        };
        Ok(vec![position])
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> ExchangeResult<()> {
        self.check()
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.check()?;
        Ok(sample_ticker(symbol, 42_000.0))
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        self.check()?;
        let levels = |start: f64, step: f64| {
            (0..depth)
                .map(|i| OrderBookLevel::new(start + step * i as f64, 1.0))
                .collect::<Vec<_>>()
        };
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: levels(41_999.5, -0.5),
            asks: levels(42_000.5, 0.5),
            timestamp: current_time_ms(),
        })
    }

    async fn get_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<Trade>> {
        self.check()?;
        Ok((0..limit)
            .map(|i| Trade {
                id: format!("t-{}", i),
                symbol: symbol.to_string(),
                price: 42_000.0,
                amount: 0.01,
                side: OrderSide::Buy,
                timestamp: current_time_ms(),
            })
            .collect())
    }

    async fn create_order(&self, request: OrderRequest) -> ExchangeResult<Order> {
        request.validate()?;
        self.check()?;
        let n = self.control.orders_placed.fetch_add(1, Ordering::SeqCst);
        let filled = match request.order_type {
            OrderType::Market => request.amount,
            OrderType::Limit => 0.0,
        };
        Ok(Order {
            id: format!("{}-{}", self.name, n + 1),
            client_order_id: Some(request.client_order_id_or_new()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: if filled > 0.0 {
                OrderStatus::Filled
            } else {
                OrderStatus::Open
            },
            price: request.price,
            average_price: request.price.or(Some(42_000.0)).filter(|_| filled > 0.0),
            amount: request.amount,
            filled,
            remaining: request.amount - filled,
            timestamp: current_time_ms(),
        })
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        let mut order = self.get_order(order_id, symbol).await?;
        order.status = OrderStatus::Canceled;
        Ok(order)
    }

    async fn get_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<Order> {
        self.check()?;
        if order_id.is_empty() {
            return Err(ExchangeError::OrderNotFound(order_id.to_string()));
        }
        Ok(Order {
            id: order_id.to_string(),
            client_order_id: None,
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            status: OrderStatus::Open,
            price: Some(41_000.0),
            average_price: None,
            amount: 0.1,
            filled: 0.0,
            remaining: 0.1,
            timestamp: current_time_ms(),
        })
    }

    async fn get_open_orders(&self, _symbol: Option<&str>) -> ExchangeResult<Vec<Order>> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn subscribe(
        &mut self,
        kind: SubscriptionType,
        symbol: &str,
        callback: StreamCallback,
    ) -> ExchangeResult<bool> {
        if !self.connected {
            return Err(ExchangeError::NotConnected(self.name.to_string()));
        }
        match self.subscriptions.insert(SubscriptionKey::new(kind, symbol), callback) {
            Registration::NewStream => {
                self.stream_subscribe_calls += 1;
                Ok(true)
            }
            Registration::Attached | Registration::Duplicate => Ok(false),
        }
    }

    async fn unsubscribe(&mut self, kind: SubscriptionType, symbol: &str) -> ExchangeResult<bool> {
        Ok(self.subscriptions.remove(&SubscriptionKey::new(kind, symbol)))
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_ws_connected(&self) -> bool {
        self.connected && !self.control.ws_down.load(Ordering::SeqCst)
    }

    fn last_heartbeat(&self) -> u64 {
        if !self.connected {
            0
        } else if self.control.frozen_heartbeat.load(Ordering::SeqCst) {
            1
        } else {
            current_time_ms()
        }
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }

    fn exchange_name(&self) -> &'static str {
        self.name
    }
}
