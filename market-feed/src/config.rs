use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single venue pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Venue identifier ("binance", "coinbase", "kraken")
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// WebSocket host name (also used for TLS SNI)
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket path; venues that encode the subscription in the URL
    /// derive their own path from the descriptor
    #[serde(default = "default_path")]
    pub path: String,
    /// REST base URL for order-book snapshot recovery
    #[serde(default)]
    pub rest_url: String,
    pub subscription: Subscription,
    /// Certificate verification is on unless explicitly disabled
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    /// Advisory CPU pins for the two pipeline threads
    #[serde(default)]
    pub io_core: Option<usize>,
    #[serde(default)]
    pub parser_core: Option<usize>,
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

impl VenueConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

/// Venue-specific subscription descriptor, distinguished by shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subscription {
    /// Combined-stream subscription encoded in the URL path
    Binance { streams: Vec<String> },
    /// Post-connect JSON subscribe message
    Coinbase {
        product_ids: Vec<String>,
        channels: Vec<String>,
    },
    /// JSON-RPC-like v2 subscribe envelope
    Kraken { method: String, params: KrakenParams },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KrakenParams {
    pub channel: String,
    pub symbol: Vec<String>,
}

/// Logging setup for the agent binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Append-only log files go under this directory; stderr when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    443
}

fn default_path() -> String {
    "/".to_string()
}

fn default_ring_capacity() -> usize {
    8192
}

fn default_ping_interval() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}
