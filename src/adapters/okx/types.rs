//! OKX Types
//!
//! v5 REST envelopes, account/market/order rows and public WebSocket pushes.
//! Numbers and timestamps arrive as strings; empty strings mean "absent".

use serde::Deserialize;

use crate::adapters::errors::ExchangeResult;
use crate::adapters::normalize::{
    normalize_value, parse_num, parse_opt, parse_or_zero, parse_timestamp,
};
use crate::adapters::types::{
    current_time_ms, Balance, MarginMode, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus,
    OrderType, Position, PositionSide, Ticker, Trade,
};

use super::config::from_inst_id;

// =============================================================================
// Envelope
// =============================================================================

/// `{"code":"0","msg":"","data":[...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct OkxResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Per-item result of trade endpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxItemStatus {
    #[serde(default)]
    pub s_code: Option<String>,
    #[serde(default)]
    pub s_msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxOrderAck {
    pub ord_id: String,
    #[serde(default)]
    pub cl_ord_id: Option<String>,
}

fn timestamp_or_now(raw: &str) -> u64 {
    parse_timestamp(raw).unwrap_or_else(|_| current_time_ms())
}

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxAccountBalance {
    pub total_eq: String,
    #[serde(default)]
    pub u_time: String,
    #[serde(default)]
    pub details: Vec<OkxBalanceDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxBalanceDetail {
    pub ccy: String,
    pub eq: String,
    #[serde(default)]
    pub avail_bal: String,
    #[serde(default)]
    pub frozen_bal: String,
    #[serde(default)]
    pub upl: String,
}

impl OkxBalanceDetail {
    pub fn to_balance(&self) -> ExchangeResult<Balance> {
        let total = parse_num(&self.eq, "eq")?;
        Ok(Balance {
            asset: self.ccy.clone(),
            total,
            free: parse_or_zero(Some(&self.avail_bal)),
            used: parse_or_zero(Some(&self.frozen_bal)),
            unrealized_pnl: parse_or_zero(Some(&self.upl)),
        })
    }
}

impl OkxAccountBalance {
    pub fn balances(&self) -> ExchangeResult<Vec<Balance>> {
        self.details.iter().map(OkxBalanceDetail::to_balance).collect()
    }

    pub fn timestamp(&self) -> u64 {
        timestamp_or_now(&self.u_time)
    }

    pub fn total_equity(&self) -> ExchangeResult<f64> {
        parse_num(&self.total_eq, "totalEq")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxPosition {
    pub inst_id: String,
    pub pos: String,
    /// `net`, `long` or `short`
    pub pos_side: String,
    #[serde(default)]
    pub avg_px: String,
    #[serde(default)]
    pub mark_px: String,
    #[serde(default)]
    pub upl: String,
    #[serde(default)]
    pub liq_px: String,
    #[serde(default)]
    pub lever: String,
    #[serde(default)]
    pub mgn_mode: String,
    #[serde(default)]
    pub u_time: String,
}

impl OkxPosition {
    pub fn to_position(&self) -> ExchangeResult<Option<Position>> {
        let pos = parse_or_zero(Some(&self.pos));
        if pos == 0.0 {
            return Ok(None);
        }
        let side = match self.pos_side.as_str() {
            "long" => PositionSide::Long,
            "short" => PositionSide::Short,
            _ if pos > 0.0 => PositionSide::Long,
            _ => PositionSide::Short,
        };
        Ok(Some(Position {
            symbol: from_inst_id(&self.inst_id),
            side,
            size: pos.abs(),
            entry_price: parse_num(&self.avg_px, "avgPx")?,
            mark_price: parse_or_zero(Some(&self.mark_px)),
            unrealized_pnl: parse_or_zero(Some(&self.upl)),
            liquidation_price: parse_opt(Some(&self.liq_px)),
            leverage: parse_or_zero(Some(&self.lever)),
            margin_mode: if self.mgn_mode == "isolated" {
                MarginMode::Isolated
            } else {
                MarginMode::Cross
            },
            timestamp: timestamp_or_now(&self.u_time),
        }))
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// Ticker row, shared by REST and the `tickers` channel
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxTicker {
    pub inst_id: String,
    pub last: String,
    #[serde(default)]
    pub bid_px: String,
    #[serde(default)]
    pub ask_px: String,
    #[serde(default)]
    pub open24h: String,
    #[serde(default)]
    pub high24h: String,
    #[serde(default)]
    pub low24h: String,
    /// Base-currency volume for swaps
    #[serde(default)]
    pub vol_ccy24h: String,
    pub ts: String,
}

impl OkxTicker {
    pub fn to_ticker(&self) -> ExchangeResult<Ticker> {
        let last = parse_num(&self.last, "last")?;
        let volume = parse_or_zero(Some(&self.vol_ccy24h));
        let change_percent_24h = parse_opt(Some(&self.open24h))
            .map(|open| normalize_value((last - open) / open * 100.0));
        Ok(Ticker {
            symbol: from_inst_id(&self.inst_id),
            last,
            bid: parse_opt(Some(&self.bid_px)),
            ask: parse_opt(Some(&self.ask_px)),
            high_24h: parse_or_zero(Some(&self.high24h)),
            low_24h: parse_or_zero(Some(&self.low24h)),
            volume_24h: volume,
            quote_volume_24h: normalize_value(volume * last),
            change_percent_24h,
            timestamp: parse_timestamp(&self.ts)?,
        })
    }
}

/// Book row: levels are `[px, sz, liquidated_orders, order_count]`
#[derive(Debug, Clone, Deserialize)]
pub struct OkxBook {
    pub asks: Vec<Vec<String>>,
    pub bids: Vec<Vec<String>>,
    pub ts: String,
}

fn parse_levels(rows: &[Vec<String>], depth: usize) -> ExchangeResult<Vec<OrderBookLevel>> {
    rows.iter()
        .take(depth)
        .map(|row| {
            let px = row.first().map(String::as_str).unwrap_or("");
            let sz = row.get(1).map(String::as_str).unwrap_or("");
            Ok(OrderBookLevel::new(parse_num(px, "px")?, parse_num(sz, "sz")?))
        })
        .collect()
}

impl OkxBook {
    pub fn to_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: parse_levels(&self.bids, depth)?,
            asks: parse_levels(&self.asks, depth)?,
            timestamp: parse_timestamp(&self.ts)?,
        })
    }
}

/// Trade row, shared by REST and the `trades` channel
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxTrade {
    pub inst_id: String,
    pub trade_id: String,
    pub px: String,
    pub sz: String,
    pub side: String,
    pub ts: String,
}

impl OkxTrade {
    pub fn to_trade(&self) -> ExchangeResult<Trade> {
        Ok(Trade {
            id: self.trade_id.clone(),
            symbol: from_inst_id(&self.inst_id),
            price: parse_num(&self.px, "px")?,
            amount: parse_num(&self.sz, "sz")?,
            side: if self.side == "sell" {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            timestamp: parse_timestamp(&self.ts)?,
        })
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxOrder {
    pub ord_id: String,
    #[serde(default)]
    pub cl_ord_id: String,
    pub inst_id: String,
    pub side: String,
    pub ord_type: String,
    pub state: String,
    #[serde(default)]
    pub px: String,
    #[serde(default)]
    pub avg_px: String,
    pub sz: String,
    #[serde(default)]
    pub acc_fill_sz: String,
    #[serde(default)]
    pub u_time: String,
}

pub fn map_order_status(state: &str) -> OrderStatus {
    match state {
        "live" => OrderStatus::Open,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        // canceled, mmp_canceled
        _ => OrderStatus::Canceled,
    }
}

impl OkxOrder {
    pub fn to_order(&self) -> ExchangeResult<Order> {
        let amount = parse_num(&self.sz, "sz")?;
        let filled = parse_or_zero(Some(&self.acc_fill_sz));
        Ok(Order {
            id: self.ord_id.clone(),
            client_order_id: Some(self.cl_ord_id.clone()).filter(|s| !s.is_empty()),
            symbol: from_inst_id(&self.inst_id),
            side: if self.side == "sell" {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            order_type: if self.ord_type == "market" {
                OrderType::Market
            } else {
                OrderType::Limit
            },
            status: map_order_status(&self.state),
            price: parse_opt(Some(&self.px)),
            average_price: parse_opt(Some(&self.avg_px)),
            amount,
            filled,
            remaining: normalize_value((amount - filled).max(0.0)),
            timestamp: timestamp_or_now(&self.u_time),
        })
    }
}

// =============================================================================
// WebSocket
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxWsArg {
    pub channel: String,
    #[serde(default)]
    pub inst_id: String,
}

/// Any inbound JSON frame: event replies carry `event`, pushes carry `data`
#[derive(Debug, Clone, Deserialize)]
pub struct OkxWsMessage {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub arg: Option<OkxWsArg>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}
