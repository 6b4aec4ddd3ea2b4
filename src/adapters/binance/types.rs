//! Binance Types
//!
//! REST and WebSocket payloads for USDⓈ-M futures, with conversions to the
//! normalized adapter types. Binance sends every number as a string.

use serde::Deserialize;

use crate::adapters::errors::ExchangeResult;
use crate::adapters::normalize::{from_concatenated, normalize_timestamp, parse_num, parse_opt};
use crate::adapters::types::{
    current_time_ms, Balance, MarginMode, Order, OrderBook, OrderBookLevel, OrderSide, OrderStatus,
    OrderType, Position, PositionSide, Ticker, Trade,
};

// =============================================================================
// Errors
// =============================================================================

/// `{"code": -2019, "msg": "Margin is insufficient."}`
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceApiError {
    pub code: i64,
    pub msg: String,
}

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceAccount {
    pub total_margin_balance: String,
    pub available_balance: String,
    pub total_unrealized_profit: String,
    #[serde(default)]
    pub assets: Vec<BinanceAccountAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceAccountAsset {
    pub asset: String,
    pub wallet_balance: String,
    pub unrealized_profit: String,
    pub available_balance: String,
}

impl BinanceAccountAsset {
    pub fn to_balance(&self) -> ExchangeResult<Balance> {
        let total = parse_num(&self.wallet_balance, "walletBalance")?;
        let free = parse_num(&self.available_balance, "availableBalance")?;
        Ok(Balance {
            asset: self.asset.clone(),
            total,
            free,
            used: (total - free).max(0.0),
            unrealized_pnl: parse_num(&self.unrealized_profit, "unrealizedProfit")?,
        })
    }
}

/// Row of `/fapi/v2/balance`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceBalance {
    pub asset: String,
    pub balance: String,
    pub available_balance: String,
    #[serde(default)]
    pub cross_un_pnl: Option<String>,
}

impl BinanceBalance {
    pub fn to_balance(&self) -> ExchangeResult<Balance> {
        let total = parse_num(&self.balance, "balance")?;
        let free = parse_num(&self.available_balance, "availableBalance")?;
        Ok(Balance {
            asset: self.asset.clone(),
            total,
            free,
            used: (total - free).max(0.0),
            unrealized_pnl: self
                .cross_un_pnl
                .as_deref()
                .map(|v| parse_num(v, "crossUnPnl"))
                .transpose()?
                .unwrap_or(0.0),
        })
    }
}

/// Row of `/fapi/v2/positionRisk`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinancePositionRisk {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
    pub mark_price: String,
    pub un_realized_profit: String,
    pub liquidation_price: String,
    pub leverage: String,
    pub margin_type: String,
    #[serde(default)]
    pub update_time: u64,
}

impl BinancePositionRisk {
    /// `None` for flat rows, which the endpoint returns for every symbol
    pub fn to_position(&self) -> ExchangeResult<Option<Position>> {
        let amount = parse_num(&self.position_amt, "positionAmt")?;
        if amount == 0.0 {
            return Ok(None);
        }
        Ok(Some(Position {
            symbol: from_concatenated(&self.symbol),
            side: if amount > 0.0 {
                PositionSide::Long
            } else {
                PositionSide::Short
            },
            size: amount.abs(),
            entry_price: parse_num(&self.entry_price, "entryPrice")?,
            mark_price: parse_num(&self.mark_price, "markPrice")?,
            unrealized_pnl: parse_num(&self.un_realized_profit, "unRealizedProfit")?,
            liquidation_price: parse_opt(Some(&self.liquidation_price)),
            leverage: parse_num(&self.leverage, "leverage")?,
            margin_mode: if self.margin_type.eq_ignore_ascii_case("isolated") {
                MarginMode::Isolated
            } else {
                MarginMode::Cross
            },
            timestamp: match self.update_time {
                0 => current_time_ms(),
                t => normalize_timestamp(t),
            },
        }))
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// `/fapi/v1/ticker/24hr`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binance24hTicker {
    pub symbol: String,
    pub last_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub price_change_percent: String,
    pub close_time: u64,
}

/// `/fapi/v1/ticker/bookTicker`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceBookTicker {
    pub bid_price: String,
    pub ask_price: String,
}

impl Binance24hTicker {
    pub fn to_ticker(&self, book: Option<&BinanceBookTicker>) -> ExchangeResult<Ticker> {
        Ok(Ticker {
            symbol: from_concatenated(&self.symbol),
            last: parse_num(&self.last_price, "lastPrice")?,
            bid: book.and_then(|b| parse_opt(Some(&b.bid_price))),
            ask: book.and_then(|b| parse_opt(Some(&b.ask_price))),
            high_24h: parse_num(&self.high_price, "highPrice")?,
            low_24h: parse_num(&self.low_price, "lowPrice")?,
            volume_24h: parse_num(&self.volume, "volume")?,
            quote_volume_24h: parse_num(&self.quote_volume, "quoteVolume")?,
            change_percent_24h: parse_num(&self.price_change_percent, "priceChangePercent").ok(),
            timestamp: normalize_timestamp(self.close_time),
        })
    }
}

/// `/fapi/v1/depth`
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceDepth {
    #[serde(rename = "T", default)]
    pub transaction_time: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

pub fn parse_levels(rows: &[[String; 2]], depth: usize) -> ExchangeResult<Vec<OrderBookLevel>> {
    rows.iter()
        .take(depth)
        .map(|[price, qty]| Ok(OrderBookLevel::new(parse_num(price, "price")?, parse_num(qty, "qty")?)))
        .collect()
}

impl BinanceDepth {
    pub fn to_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: parse_levels(&self.bids, depth)?,
            asks: parse_levels(&self.asks, depth)?,
            timestamp: match self.transaction_time {
                0 => current_time_ms(),
                t => normalize_timestamp(t),
            },
        })
    }
}

/// Row of `/fapi/v1/trades`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceTrade {
    pub id: u64,
    pub price: String,
    pub qty: String,
    pub time: u64,
    pub is_buyer_maker: bool,
}

impl BinanceTrade {
    pub fn to_trade(&self, symbol: &str) -> ExchangeResult<Trade> {
        Ok(Trade {
            id: self.id.to_string(),
            symbol: symbol.to_string(),
            price: parse_num(&self.price, "price")?,
            amount: parse_num(&self.qty, "qty")?,
            // Buyer is maker: the aggressor sold
            side: if self.is_buyer_maker {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            timestamp: normalize_timestamp(self.time),
        })
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrder {
    pub order_id: u64,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    pub price: String,
    #[serde(default)]
    pub avg_price: Option<String>,
    pub orig_qty: String,
    pub executed_qty: String,
    #[serde(default)]
    pub update_time: u64,
}

pub fn map_order_status(status: &str) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::Open,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "REJECTED" => OrderStatus::Rejected,
        // CANCELED, EXPIRED, EXPIRED_IN_MATCH
        _ => OrderStatus::Canceled,
    }
}

impl BinanceOrder {
    pub fn to_order(&self) -> ExchangeResult<Order> {
        let amount = parse_num(&self.orig_qty, "origQty")?;
        let filled = parse_num(&self.executed_qty, "executedQty")?;
        Ok(Order {
            id: self.order_id.to_string(),
            client_order_id: self.client_order_id.clone(),
            symbol: from_concatenated(&self.symbol),
            side: if self.side == "SELL" {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            order_type: if self.order_type == "MARKET" {
                OrderType::Market
            } else {
                OrderType::Limit
            },
            status: map_order_status(&self.status),
            price: parse_opt(Some(&self.price)),
            average_price: parse_opt(self.avg_price.as_deref()),
            amount,
            filled,
            remaining: (amount - filled).max(0.0),
            timestamp: match self.update_time {
                0 => current_time_ms(),
                t => normalize_timestamp(t),
            },
        })
    }
}

// =============================================================================
// WebSocket
// =============================================================================

/// Market stream events, tagged by `e`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum BinanceWsEvent {
    #[serde(rename = "24hrTicker")]
    Ticker(BinanceWsTicker),
    #[serde(rename = "depthUpdate")]
    Depth(BinanceWsDepth),
    #[serde(rename = "aggTrade")]
    AggTrade(BinanceWsAggTrade),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceWsTicker {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "q")]
    pub quote_volume: String,
    #[serde(rename = "P")]
    pub change_percent: String,
}

impl BinanceWsTicker {
    /// Futures ticker streams carry no top of book
    pub fn to_ticker(&self) -> ExchangeResult<Ticker> {
        Ok(Ticker {
            symbol: from_concatenated(&self.symbol),
            last: parse_num(&self.last, "c")?,
            bid: None,
            ask: None,
            high_24h: parse_num(&self.high, "h")?,
            low_24h: parse_num(&self.low, "l")?,
            volume_24h: parse_num(&self.volume, "v")?,
            quote_volume_24h: parse_num(&self.quote_volume, "q")?,
            change_percent_24h: parse_num(&self.change_percent, "P").ok(),
            timestamp: normalize_timestamp(self.event_time),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceWsDepth {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

impl BinanceWsDepth {
    pub fn to_order_book(&self) -> ExchangeResult<OrderBook> {
        Ok(OrderBook {
            symbol: from_concatenated(&self.symbol),
            bids: parse_levels(&self.bids, usize::MAX)?,
            asks: parse_levels(&self.asks, usize::MAX)?,
            timestamp: normalize_timestamp(self.event_time),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceWsAggTrade {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub qty: String,
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl BinanceWsAggTrade {
    pub fn to_trade(&self) -> ExchangeResult<Trade> {
        Ok(Trade {
            id: self.trade_id.to_string(),
            symbol: from_concatenated(&self.symbol),
            price: parse_num(&self.price, "p")?,
            amount: parse_num(&self.qty, "q")?,
            side: if self.is_buyer_maker {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            timestamp: normalize_timestamp(self.trade_time),
        })
    }
}

/// Reply to a SUBSCRIBE/UNSUBSCRIBE request
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceWsReply {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub error: Option<BinanceApiError>,
}
