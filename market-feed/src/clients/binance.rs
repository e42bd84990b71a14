//! Binance combined-stream dialect.
//!
//! The subscription is encoded in the URL path, so no post-connect
//! subscribe frame exists and the first inbound frame is already data.

use market_core::VenueId;

use crate::error::ClientError;
use crate::session::{Ack, Dialect};

pub struct BinanceDialect {
    streams: Vec<String>,
}

impl BinanceDialect {
    pub fn new(streams: Vec<String>) -> Self {
        BinanceDialect { streams }
    }
}

impl Dialect for BinanceDialect {
    fn venue(&self) -> VenueId {
        VenueId::Binance
    }

    fn request_path(&self, configured: &str) -> String {
        if self.streams.is_empty() {
            configured.to_string()
        } else {
            format!("/stream?streams={}", self.streams.join("/"))
        }
    }

    async fn subscribe_frames(&mut self) -> Result<Vec<String>, ClientError> {
        Ok(Vec::new())
    }

    fn classify_ack(&self, _frame: &str) -> Ack {
        Ack::Data
    }
}
