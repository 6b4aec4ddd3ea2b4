//! Symbol, precision and timestamp normalization shared by adapters
//!
//! Exchanges disagree on almost everything: `BTCUSDT` vs `BTC-USDT-SWAP`,
//! seconds vs milliseconds vs microseconds, numbers as strings or floats.
//! Adapters funnel every value through these helpers on the way in and out.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::types::VALUE_PRECISION;

/// Quote currencies recognised when splitting concatenated symbols.
/// Longest first so that `USDT` wins over `USD`.
const KNOWN_QUOTES: &[&str] = &["FDUSD", "USDT", "USDC", "BUSD", "USD", "BTC", "ETH"];

// =============================================================================
// Symbols
// =============================================================================

/// Split a normalized `BASE/QUOTE` symbol.
pub fn split_symbol(symbol: &str) -> ExchangeResult<(&str, &str)> {
    match symbol.split_once('/') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok((base, quote)),
        _ => Err(ExchangeError::InvalidOrder(format!(
            "symbol must be BASE/QUOTE, got '{}'",
            symbol
        ))),
    }
}

/// `BTC/USDT` -> `BTCUSDT`
pub fn to_concatenated(symbol: &str) -> ExchangeResult<String> {
    let (base, quote) = split_symbol(symbol)?;
    Ok(format!("{}{}", base.to_uppercase(), quote.to_uppercase()))
}

/// `BTCUSDT` -> `BTC/USDT`; unknown quotes are returned unchanged
pub fn from_concatenated(native: &str) -> String {
    let upper = native.to_uppercase();
    for quote in KNOWN_QUOTES {
        if let Some(base) = upper.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{}/{}", base, quote);
            }
        }
    }
    upper
}

// =============================================================================
// Precision
// =============================================================================

fn to_decimal(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        Decimal::from_f64(value)
    } else {
        None
    }
}

/// Round a value to `dp` decimal places (half away from zero)
pub fn round_value(value: f64, dp: u32) -> f64 {
    to_decimal(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Round to the shared value precision
pub fn normalize_value(value: f64) -> f64 {
    round_value(value, VALUE_PRECISION)
}

/// Format a price for the wire, rounded half away from zero, no trailing zeros
pub fn format_price(value: f64, dp: u32) -> String {
    to_decimal(value)
        .map(|d| {
            d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
                .normalize()
                .to_string()
        })
        .unwrap_or_else(|| value.to_string())
}

/// Format an amount for the wire, truncated toward zero so the order never
/// exceeds what the caller asked for
pub fn format_amount(value: f64, dp: u32) -> String {
    to_decimal(value)
        .map(|d| {
            d.round_dp_with_strategy(dp, RoundingStrategy::ToZero)
                .normalize()
                .to_string()
        })
        .unwrap_or_else(|| value.to_string())
}

/// Parse a numeric string field, rounded to the shared value precision
pub fn parse_num(raw: &str, field: &str) -> ExchangeResult<f64> {
    raw.trim()
        .parse::<f64>()
        .map(normalize_value)
        .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid {} '{}': {}", field, raw, e)))
}

/// Parse an optional numeric field; empty strings and zero mean "absent"
pub fn parse_opt(raw: Option<&str>) -> Option<f64> {
    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| *v != 0.0)
        .map(normalize_value)
}

/// Parse a numeric field, treating missing/empty as zero
pub fn parse_or_zero(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .map(normalize_value)
        .unwrap_or(0.0)
}

// =============================================================================
// Timestamps
// =============================================================================

/// Normalize a Unix timestamp in s / ms / µs / ns to milliseconds
pub fn normalize_timestamp(ts: u64) -> u64 {
    match ts {
        0 => 0,
        t if t < 100_000_000_000 => t * 1_000,
        t if t < 100_000_000_000_000 => t,
        t if t < 100_000_000_000_000_000 => t / 1_000,
        t => t / 1_000_000,
    }
}

/// Parse a timestamp carried as a string (numeric, any unit)
pub fn parse_timestamp(raw: &str) -> ExchangeResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map(normalize_timestamp)
        .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenated_symbols() {
        assert_eq!(to_concatenated("BTC/USDT").unwrap(), "BTCUSDT");
        assert_eq!(to_concatenated("eth/usdc").unwrap(), "ETHUSDC");
        assert!(to_concatenated("BTCUSDT").is_err());

        assert_eq!(from_concatenated("BTCUSDT"), "BTC/USDT");
        assert_eq!(from_concatenated("ethusdc"), "ETH/USDC");
        assert_eq!(from_concatenated("SOLUSD"), "SOL/USD");
        assert_eq!(from_concatenated("1000PEPEUSDT"), "1000PEPE/USDT");
        assert_eq!(from_concatenated("WEIRD"), "WEIRD");
    }

    #[test]
    fn test_split_symbol_rejects_malformed() {
        assert_eq!(split_symbol("BTC/USDT").unwrap(), ("BTC", "USDT"));
        assert!(split_symbol("/USDT").is_err());
        assert!(split_symbol("BTC/").is_err());
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_value(1.23456789123, 8), 1.23456789);
        assert_eq!(round_value(2.5, 0), 3.0);
        assert_eq!(format_price(42000.129, 2), "42000.13");
        assert_eq!(format_price(42000.0, 2), "42000");
        assert_eq!(format_amount(0.0019999, 3), "0.001");
        assert_eq!(format_amount(1.5, 3), "1.5");
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_num("42150.5", "price").unwrap(), 42150.5);
        assert!(matches!(
            parse_num("abc", "price"),
            Err(ExchangeError::InvalidResponse(_))
        ));
        assert_eq!(parse_opt(Some("")), None);
        assert_eq!(parse_opt(Some("0")), None);
        assert_eq!(parse_opt(Some("1.5")), Some(1.5));
        assert_eq!(parse_or_zero(None), 0.0);
    }

    #[test]
    fn test_timestamp_units() {
        assert_eq!(normalize_timestamp(1_706_000_000), 1_706_000_000_000);
        assert_eq!(normalize_timestamp(1_706_000_000_123), 1_706_000_000_123);
        assert_eq!(normalize_timestamp(1_706_000_000_123_456), 1_706_000_000_123);
        assert_eq!(normalize_timestamp(1_706_000_000_123_456_789), 1_706_000_000_123);
        assert_eq!(parse_timestamp("1706000000123").unwrap(), 1_706_000_000_123);
    }
}
