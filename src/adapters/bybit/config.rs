//! Bybit v5 Configuration

use crate::adapters::settings::AdapterSettings;

// =============================================================================
// Constants
// =============================================================================

const MAINNET_REST_URL: &str = "https://api.bybit.com";
const TESTNET_REST_URL: &str = "https://api-testnet.bybit.com";
const MAINNET_WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";
const TESTNET_WS_URL: &str = "wss://stream-testnet.bybit.com/v5/public/linear";

/// Product category traded by this adapter
pub const CATEGORY: &str = "linear";

/// Depth of the `orderbook.{depth}.{symbol}` topic
pub const STREAM_BOOK_DEPTH: usize = 50;

/// Max depth served by `/v5/market/orderbook` for linear
pub const MAX_BOOK_DEPTH: usize = 500;

/// Max rows served by `/v5/market/recent-trade` for linear
pub const MAX_TRADES_LIMIT: usize = 1000;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct BybitConfig {
    /// Route to testnet (taken from the credentials on connect)
    pub sandbox: bool,
    pub settings: AdapterSettings,
}

impl BybitConfig {
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
