//! Per-exchange adapter settings
//!
//! Shared by every venue's config. Everything is optional in YAML; endpoint
//! overrides exist for local gateways and for tests against mock servers.

use serde::{Deserialize, Serialize};

/// Default decimal places for outbound prices
pub const DEFAULT_PRICE_PRECISION: u32 = 8;
/// Default decimal places for outbound amounts
pub const DEFAULT_AMOUNT_PRECISION: u32 = 6;
/// Default signed-request validity window
pub const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    /// Override of the REST base URL (sandbox flag is ignored when set)
    pub rest_url: Option<String>,
    /// Override of the public WebSocket URL
    pub ws_url: Option<String>,
    /// Open the market-data WebSocket on connect
    pub enable_websocket: bool,
    pub price_precision: u32,
    pub amount_precision: u32,
    pub recv_window_ms: u64,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            rest_url: None,
            ws_url: None,
            enable_websocket: true,
            price_precision: DEFAULT_PRICE_PRECISION,
            amount_precision: DEFAULT_AMOUNT_PRECISION,
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
        }
    }
}

impl AdapterSettings {
    /// REST-only settings pointing at `rest_url`
    pub fn rest_only(rest_url: impl Into<String>) -> Self {
        Self {
            rest_url: Some(rest_url.into()),
            enable_websocket: false,
            ..Self::default()
        }
    }

    pub(crate) fn pick_rest_url(&self, production: &str, sandbox: &str, use_sandbox: bool) -> String {
        match &self.rest_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if use_sandbox => sandbox.to_string(),
            None => production.to_string(),
        }
    }

    pub(crate) fn pick_ws_url(&self, production: &str, sandbox: &str, use_sandbox: bool) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None if use_sandbox => sandbox.to_string(),
            None => production.to_string(),
        }
    }
}
