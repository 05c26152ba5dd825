use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::types::ChainParams;

/// Reconciliation store options.
#[derive(Debug, Deserialize, Clone)]
pub struct Monitor {
    /// Cap on retained events; capacity eviction drops the oldest entries.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Begin listening immediately on construction.
    #[serde(default = "default_false")]
    pub auto_start: bool,
    /// Skip the historical backfill entirely if false.
    #[serde(default = "default_true")]
    pub include_historical_events: bool,
    /// How many blocks back the backfill window reaches.
    #[serde(default = "default_historical_block_range")]
    pub historical_block_range: u64,
}

fn default_max_events() -> usize {
    50
}
fn default_false() -> bool {
    false
}
fn default_true() -> bool {
    true
}
fn default_historical_block_range() -> u64 {
    1000
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            auto_start: default_false(),
            include_historical_events: default_true(),
            historical_block_range: default_historical_block_range(),
        }
    }
}

/// Balance cache polling cadence.
#[derive(Debug, Deserialize, Clone)]
pub struct Balances {
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
}

fn default_refresh_interval_seconds() -> u64 {
    30
}

impl Default for Balances {
    fn default() -> Self {
        Self {
            auto_refresh: default_true(),
            refresh_interval_seconds: default_refresh_interval_seconds(),
        }
    }
}

/// Transport endpoint and the expected target network.
#[derive(Debug, Deserialize, Clone)]
pub struct Network {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Chain id the monitor expects to operate on. A chain-changed
    /// notification to any other id raises the wrong-network warning.
    #[serde(default = "default_expected_chain_id")]
    pub expected_chain_id: u64,
    #[serde(default = "default_chain_name")]
    pub chain_name: String,
    #[serde(default = "default_native_symbol")]
    pub native_currency_symbol: String,
    #[serde(default = "default_native_decimals")]
    pub native_currency_decimals: u8,
    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
}

fn default_rpc_url() -> String {
    "ws://127.0.0.1:8545".to_string()
}
fn default_expected_chain_id() -> u64 {
    11155111 // Sepolia
}
fn default_chain_name() -> String {
    "Sepolia".to_string()
}
fn default_native_symbol() -> String {
    "ETH".to_string()
}
fn default_native_decimals() -> u8 {
    18
}

impl Default for Network {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            expected_chain_id: default_expected_chain_id(),
            chain_name: default_chain_name(),
            native_currency_symbol: default_native_symbol(),
            native_currency_decimals: default_native_decimals(),
            block_explorer_urls: Vec::new(),
        }
    }
}

impl Network {
    /// Parameters handed to `wallet_addEthereumChain` when the target network
    /// is unknown to the transport.
    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            chain_id: self.expected_chain_id,
            chain_name: self.chain_name.clone(),
            rpc_urls: vec![self.rpc_url.clone()],
            native_currency_symbol: self.native_currency_symbol.clone(),
            native_currency_decimals: self.native_currency_decimals,
            block_explorer_urls: self.block_explorer_urls.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub monitor: Monitor,
    #[serde(default)]
    pub balances: Balances,
    #[serde(default)]
    pub network: Network,
}

impl Settings {
    /// Load from `config/default.toml` (optional) layered with
    /// `TRANSFER_MONITOR__*` environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("TRANSFER_MONITOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        cfg.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = Settings::default();
        assert_eq!(settings.monitor.max_events, 50);
        assert!(settings.monitor.include_historical_events);
        assert!(!settings.monitor.auto_start);
        assert_eq!(settings.monitor.historical_block_range, 1000);
        assert_eq!(settings.balances.refresh_interval_seconds, 30);
        assert!(settings.balances.auto_refresh);
    }

    #[test]
    fn chain_params_mirror_network() {
        let network = Network::default();
        let params = network.chain_params();
        assert_eq!(params.chain_id, network.expected_chain_id);
        assert_eq!(params.rpc_urls, vec![network.rpc_url.clone()]);
    }
}
