//! OKX v5 Configuration
//!
//! OKX serves demo trading from the production REST host; the
//! `x-simulated-trading` header and a separate WebSocket host select it.

use crate::adapters::errors::ExchangeResult;
use crate::adapters::normalize::split_symbol;
use crate::adapters::settings::AdapterSettings;

// =============================================================================
// Constants
// =============================================================================

const REST_URL: &str = "https://www.okx.com";
const MAINNET_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
const DEMO_WS_URL: &str = "wss://wspap.okx.com:8443/ws/v5/public";

/// Instrument type traded by this adapter
pub const INST_TYPE: &str = "SWAP";

/// Max depth served by `/api/v5/market/books`
pub const MAX_BOOK_DEPTH: usize = 400;

/// Max rows served by `/api/v5/market/trades`
pub const MAX_TRADES_LIMIT: usize = 500;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct OkxConfig {
    /// Demo trading (taken from the credentials on connect)
    pub sandbox: bool,
    pub settings: AdapterSettings,
}

impl OkxConfig {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            sandbox: false,
            settings,
        }
    }

    pub fn rest_url(&self) -> String {
        self.settings.pick_rest_url(REST_URL, REST_URL, self.sandbox)
    }

    pub fn ws_url(&self) -> String {
        self.settings
            .pick_ws_url(MAINNET_WS_URL, DEMO_WS_URL, self.sandbox)
    }
}

/// `BTC/USDT` -> `BTC-USDT-SWAP`
pub fn to_inst_id(symbol: &str) -> ExchangeResult<String> {
    let (base, quote) = split_symbol(symbol)?;
    Ok(format!(
        "{}-{}-{}",
        base.to_uppercase(),
        quote.to_uppercase(),
        INST_TYPE
    ))
}

/// `BTC-USDT-SWAP` -> `BTC/USDT`
pub fn from_inst_id(inst_id: &str) -> String {
    let trimmed = inst_id.strip_suffix("-SWAP").unwrap_or(inst_id);
    match trimmed.split_once('-') {
        Some((base, quote)) => format!("{}/{}", base, quote),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inst_id_round_trip() {
        assert_eq!(to_inst_id("BTC/USDT").unwrap(), "BTC-USDT-SWAP");
        assert_eq!(to_inst_id("eth/usdc").unwrap(), "ETH-USDC-SWAP");
        assert_eq!(from_inst_id("BTC-USDT-SWAP"), "BTC/USDT");
        assert_eq!(from_inst_id("BTC-USD"), "BTC/USD");
        assert!(to_inst_id("BTCUSDT").is_err());
    }

    #[test]
    fn test_demo_uses_separate_ws_host() {
        let mut config = OkxConfig::default();
        assert_eq!(config.ws_url(), "wss://ws.okx.com:8443/ws/v5/public");
        config.sandbox = true;
        assert_eq!(config.ws_url(), "wss://wspap.okx.com:8443/ws/v5/public");
        assert_eq!(config.rest_url(), "https://www.okx.com");
    }
}
