//! Bybit Types
//!
//! v5 REST envelopes and rows, public stream pushes and the local state used
//! to merge `snapshot`/`delta` pushes into full tickers and books.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::normalize::{
    from_concatenated, normalize_timestamp, normalize_value, parse_num, parse_opt, parse_or_zero,
    parse_timestamp,
};
use crate::adapters::types::{
    current_time_ms, Balance, MarginMode, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus,
    OrderType, Position, PositionSide, Ticker, Trade,
};

// =============================================================================
// Envelope
// =============================================================================

/// `{"retCode":0,"retMsg":"OK","result":{...},"time":...}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitResponse<T> {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    pub result: Option<T>,
    #[serde(default)]
    pub time: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitList<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitOrderAck {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

fn timestamp_or_now(raw: &str) -> u64 {
    parse_timestamp(raw).unwrap_or_else(|_| current_time_ms())
}

fn side_from(raw: &str) -> OrderSide {
    if raw.eq_ignore_ascii_case("sell") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitWallet {
    pub total_equity: String,
    #[serde(default)]
    pub total_available_balance: String,
    #[serde(default, rename = "totalPerpUPL")]
    pub total_perp_upl: String,
    #[serde(default)]
    pub coin: Vec<BybitCoin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitCoin {
    pub coin: String,
    pub equity: String,
    #[serde(default)]
    pub wallet_balance: String,
    #[serde(default)]
    pub locked: String,
    #[serde(default, rename = "totalPositionIM")]
    pub total_position_im: String,
    #[serde(default, rename = "totalOrderIM")]
    pub total_order_im: String,
    #[serde(default)]
    pub unrealised_pnl: String,
}

impl BybitCoin {
    pub fn to_balance(&self) -> ExchangeResult<Balance> {
        let total = parse_num(&self.equity, "equity")?;
        let used = normalize_value(
            parse_or_zero(Some(&self.locked))
                + parse_or_zero(Some(&self.total_position_im))
                + parse_or_zero(Some(&self.total_order_im)),
        );
        Ok(Balance {
            asset: self.coin.clone(),
            total,
            free: normalize_value((total - used).max(0.0)),
            used,
            unrealized_pnl: parse_or_zero(Some(&self.unrealised_pnl)),
        })
    }
}

impl BybitWallet {
    pub fn balances(&self) -> ExchangeResult<Vec<Balance>> {
        self.coin.iter().map(BybitCoin::to_balance).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitPosition {
    pub symbol: String,
    /// `Buy`, `Sell`, or empty when flat
    pub side: String,
    pub size: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub mark_price: String,
    #[serde(default)]
    pub unrealised_pnl: String,
    #[serde(default)]
    pub liq_price: String,
    #[serde(default)]
    pub leverage: String,
    /// 0 cross, 1 isolated
    #[serde(default)]
    pub trade_mode: i64,
    #[serde(default)]
    pub updated_time: String,
}

impl BybitPosition {
    pub fn to_position(&self) -> ExchangeResult<Option<Position>> {
        let size = parse_or_zero(Some(&self.size));
        if size == 0.0 || self.side.is_empty() {
            return Ok(None);
        }
        Ok(Some(Position {
            symbol: from_concatenated(&self.symbol),
            side: if self.side == "Sell" {
                PositionSide::Short
            } else {
                PositionSide::Long
            },
            size,
            entry_price: parse_num(&self.avg_price, "avgPrice")?,
            mark_price: parse_or_zero(Some(&self.mark_price)),
            unrealized_pnl: parse_or_zero(Some(&self.unrealised_pnl)),
            liquidation_price: parse_opt(Some(&self.liq_price)),
            leverage: parse_or_zero(Some(&self.leverage)),
            margin_mode: if self.trade_mode == 1 {
                MarginMode::Isolated
            } else {
                MarginMode::Cross
            },
            timestamp: timestamp_or_now(&self.updated_time),
        }))
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// Ticker row; stream deltas carry only changed fields, hence the options
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitTicker {
    pub symbol: String,
    #[serde(default)]
    pub last_price: Option<String>,
    #[serde(default)]
    pub bid1_price: Option<String>,
    #[serde(default)]
    pub ask1_price: Option<String>,
    #[serde(default)]
    pub high_price24h: Option<String>,
    #[serde(default)]
    pub low_price24h: Option<String>,
    #[serde(default)]
    pub volume24h: Option<String>,
    #[serde(default)]
    pub turnover24h: Option<String>,
    /// Fraction, e.g. `0.0123` for +1.23 %
    #[serde(default)]
    pub price24h_pcnt: Option<String>,
}

impl BybitTicker {
    /// Overlay the fields present in `delta`
    pub fn merge(&mut self, delta: BybitTicker) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if delta.$field.is_some() { self.$field = delta.$field; })*
            };
        }
        overlay!(
            last_price,
            bid1_price,
            ask1_price,
            high_price24h,
            low_price24h,
            volume24h,
            turnover24h,
            price24h_pcnt
        );
    }

    pub fn to_ticker(&self, timestamp: u64) -> ExchangeResult<Ticker> {
        let last = self
            .last_price
            .as_deref()
            .ok_or_else(|| ExchangeError::InvalidResponse("bybit ticker without lastPrice".into()))?;
        Ok(Ticker {
            symbol: from_concatenated(&self.symbol),
            last: parse_num(last, "lastPrice")?,
            bid: parse_opt(self.bid1_price.as_deref()),
            ask: parse_opt(self.ask1_price.as_deref()),
            high_24h: parse_or_zero(self.high_price24h.as_deref()),
            low_24h: parse_or_zero(self.low_price24h.as_deref()),
            volume_24h: parse_or_zero(self.volume24h.as_deref()),
            quote_volume_24h: parse_or_zero(self.turnover24h.as_deref()),
            change_percent_24h: self
                .price24h_pcnt
                .as_deref()
                .and_then(|p| p.trim().parse::<f64>().ok())
                .map(|p| normalize_value(p * 100.0)),
            timestamp: normalize_timestamp(timestamp),
        })
    }
}

/// `/v5/market/orderbook` result and `orderbook.*` stream data
#[derive(Debug, Clone, Deserialize)]
pub struct BybitBook {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
    #[serde(default)]
    pub ts: u64,
}

fn parse_levels(rows: &[[String; 2]], depth: usize) -> ExchangeResult<Vec<OrderBookLevel>> {
    rows.iter()
        .take(depth)
        .map(|[price, size]| Ok(OrderBookLevel::new(parse_num(price, "price")?, parse_num(size, "size")?)))
        .collect()
}

impl BybitBook {
    pub fn to_order_book(&self, depth: usize) -> ExchangeResult<OrderBook> {
        Ok(OrderBook {
            symbol: from_concatenated(&self.symbol),
            bids: parse_levels(&self.bids, depth)?,
            asks: parse_levels(&self.asks, depth)?,
            timestamp: match self.ts {
                0 => current_time_ms(),
                t => normalize_timestamp(t),
            },
        })
    }
}

/// Row of `/v5/market/recent-trade`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitTrade {
    pub exec_id: String,
    pub symbol: String,
    pub price: String,
    pub size: String,
    pub side: String,
    pub time: String,
}

impl BybitTrade {
    pub fn to_trade(&self) -> ExchangeResult<Trade> {
        Ok(Trade {
            id: self.exec_id.clone(),
            symbol: from_concatenated(&self.symbol),
            price: parse_num(&self.price, "price")?,
            amount: parse_num(&self.size, "size")?,
            side: side_from(&self.side),
            timestamp: parse_timestamp(&self.time)?,
        })
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitOrder {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub order_status: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub avg_price: String,
    pub qty: String,
    #[serde(default)]
    pub cum_exec_qty: String,
    #[serde(default)]
    pub updated_time: String,
}

pub fn map_order_status(status: &str) -> OrderStatus {
    match status {
        "New" | "Untriggered" | "Created" => OrderStatus::Open,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Filled" => OrderStatus::Filled,
        "Rejected" => OrderStatus::Rejected,
        // Cancelled, PartiallyFilledCanceled, Deactivated
        _ => OrderStatus::Canceled,
    }
}

impl BybitOrder {
    pub fn to_order(&self) -> ExchangeResult<Order> {
        let amount = parse_num(&self.qty, "qty")?;
        let filled = parse_or_zero(Some(&self.cum_exec_qty));
        Ok(Order {
            id: self.order_id.clone(),
            client_order_id: Some(self.order_link_id.clone()).filter(|s| !s.is_empty()),
            symbol: from_concatenated(&self.symbol),
            side: side_from(&self.side),
            order_type: if self.order_type == "Market" {
                OrderType::Market
            } else {
                OrderType::Limit
            },
            status: map_order_status(&self.order_status),
            price: parse_opt(Some(&self.price)),
            average_price: parse_opt(Some(&self.avg_price)),
            amount,
            filled,
            remaining: normalize_value((amount - filled).max(0.0)),
            timestamp: timestamp_or_now(&self.updated_time),
        })
    }
}

// =============================================================================
// WebSocket
// =============================================================================

/// Any inbound frame: op replies carry `op`, pushes carry `topic`
#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsMessage {
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub ret_msg: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    /// `snapshot` or `delta`
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub ts: u64,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// `publicTrade.*` row
#[derive(Debug, Clone, Deserialize)]
pub struct BybitWsTrade {
    #[serde(rename = "T")]
    pub time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "v")]
    pub size: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "i")]
    pub id: String,
}

impl BybitWsTrade {
    pub fn to_trade(&self) -> ExchangeResult<Trade> {
        Ok(Trade {
            id: self.id.clone(),
            symbol: from_concatenated(&self.symbol),
            price: parse_num(&self.price, "p")?,
            amount: parse_num(&self.size, "v")?,
            side: side_from(&self.side),
            timestamp: normalize_timestamp(self.time),
        })
    }
}

/// Book rebuilt from snapshot + deltas, keyed by exact decimal price
#[derive(Debug, Clone, Default)]
pub struct LocalBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl LocalBook {
    pub fn from_snapshot(book: &BybitBook) -> ExchangeResult<Self> {
        let mut local = Self::default();
        local.apply(book)?;
        Ok(local)
    }

    /// Apply a delta; size `0` removes the level
    pub fn apply(&mut self, book: &BybitBook) -> ExchangeResult<()> {
        fn update(side: &mut BTreeMap<Decimal, Decimal>, rows: &[[String; 2]]) -> ExchangeResult<()> {
            for [price, size] in rows {
                let price = Decimal::from_str(price)
                    .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid price '{}': {}", price, e)))?;
                let size = Decimal::from_str(size)
                    .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid size '{}': {}", size, e)))?;
                if size.is_zero() {
                    side.remove(&price);
                } else {
                    side.insert(price, size);
                }
            }
            Ok(())
        }
        update(&mut self.bids, &book.bids)?;
        update(&mut self.asks, &book.asks)
    }

    pub fn to_order_book(&self, symbol: &str, timestamp: u64) -> OrderBook {
        let level = |(price, size): (&Decimal, &Decimal)| {
            OrderBookLevel::new(
                normalize_value(price.to_f64().unwrap_or(0.0)),
                normalize_value(size.to_f64().unwrap_or(0.0)),
            )
        };
        OrderBook {
            symbol: from_concatenated(symbol),
            bids: self.bids.iter().rev().map(level).collect(),
            asks: self.asks.iter().map(level).collect(),
            timestamp: normalize_timestamp(timestamp),
        }
    }
}

/// Per-connection merge state for the public stream
#[derive(Debug, Default)]
pub struct StreamState {
    pub books: HashMap<String, LocalBook>,
    pub tickers: HashMap<String, BybitTicker>,
}
