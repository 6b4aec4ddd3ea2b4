//! Binance USDⓈ-M Futures Configuration

use crate::adapters::settings::AdapterSettings;

// =============================================================================
// Constants
// =============================================================================

const MAINNET_REST_URL: &str = "https://fapi.binance.com";
const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";
const MAINNET_WS_URL: &str = "wss://fstream.binance.com/ws";
const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com/ws";

/// Depth levels accepted by `/fapi/v1/depth`
pub const VALID_DEPTH_LIMITS: &[usize] = &[5, 10, 20, 50, 100, 500, 1000];

/// Max rows returned by `/fapi/v1/trades`
pub const MAX_TRADES_LIMIT: usize = 1000;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct BinanceConfig {
    /// Route to testnet (taken from the credentials on connect)
    pub sandbox: bool,
    pub settings: AdapterSettings,
}

impl BinanceConfig {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            sandbox: false,
            settings,
        }
    }

    pub fn rest_url(&self) -> String {
        self.settings
            .pick_rest_url(MAINNET_REST_URL, TESTNET_REST_URL, self.sandbox)
    }

    pub fn ws_url(&self) -> String {
        self.settings
            .pick_ws_url(MAINNET_WS_URL, TESTNET_WS_URL, self.sandbox)
    }
}

/// Smallest supported depth limit that covers `depth`
pub fn depth_limit(depth: usize) -> usize {
    VALID_DEPTH_LIMITS
        .iter()
        .copied()
        .find(|limit| *limit >= depth)
        .unwrap_or(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let mut config = BinanceConfig::default();
        assert_eq!(config.rest_url(), "https://fapi.binance.com");
        assert_eq!(config.ws_url(), "wss://fstream.binance.com/ws");

        config.sandbox = true;
        assert_eq!(config.rest_url(), "https://testnet.binancefuture.com");
        assert_eq!(config.ws_url(), "wss://stream.binancefuture.com/ws");
    }

    #[test]
    fn test_depth_limit() {
        assert_eq!(depth_limit(1), 5);
        assert_eq!(depth_limit(20), 20);
        assert_eq!(depth_limit(21), 50);
        assert_eq!(depth_limit(5000), 1000);
    }
}
