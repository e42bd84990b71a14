use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use market_feed::config::{LoggingConfig, VenueConfig};

/// Root configuration for the agent binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub venues: Vec<VenueConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
}

/// Cross-venue arbitrage legs: the same instrument under each venue's
/// own symbology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub venue_a: String,
    pub symbol_a: String,
    pub venue_b: String,
    pub symbol_b: String,
    #[serde(default = "default_fee")]
    pub fee: f64,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn enabled_venues(&self) -> impl Iterator<Item = &VenueConfig> {
        self.venues.iter().filter(|v| v.enabled)
    }
}

fn default_fee() -> f64 {
    0.001
}

fn default_depth() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_deserializes() {
        let json = r#"{
            "venues": [
                {
                    "id": "binance",
                    "host": "stream.binance.com",
                    "rest_url": "https://api.binance.com",
                    "subscription": { "streams": ["btcusdt@depth@100ms"] }
                },
                {
                    "id": "coinbase",
                    "host": "ws-feed.exchange.coinbase.com",
                    "enabled": false,
                    "rest_url": "https://api.exchange.coinbase.com",
                    "subscription": { "product_ids": ["BTC-USD"], "channels": ["level2_batch"] }
                }
            ],
            "logging": { "level": "debug" },
            "strategy": {
                "venue_a": "binance",
                "symbol_a": "BTCUSDT",
                "venue_b": "coinbase",
                "symbol_b": "BTC-USD"
            }
        }"#;

        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.venues.len(), 2);
        assert_eq!(config.enabled_venues().count(), 1);
        assert_eq!(config.logging.level, "debug");

        let strategy = config.strategy.unwrap();
        assert_eq!(strategy.fee, 0.001);
        assert_eq!(strategy.depth, 5);
    }
}
