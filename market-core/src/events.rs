//! Normalized market-data events.
//!
//! Every event carries the venue it came from, an uppercased symbol and
//! nanosecond Unix timestamps. Unless a field says otherwise, timestamps
//! are stamped at the moment the parser observed the frame.

use serde::{Deserialize, Serialize};

use crate::venue::VenueId;

/// One `(price, size)` level of an order book side.
pub type PriceLevel = (f64, f64);

/// Taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
    Unknown,
}

impl Side {
    pub fn from_str(s: &str) -> Self {
        match s {
            "buy" | "BUY" | "b" => Side::Buy,
            "sell" | "SELL" | "s" => Side::Sell,
            _ => Side::Unknown,
        }
    }
}

/// A single executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub venue: VenueId,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub trade_time_ns: i64,
}

/// 24-hour rolling ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub venue: VenueId,
    pub symbol: String,
    pub timestamp_ns: i64,
    pub last_price: f64,
    pub best_bid: f64,
    pub best_bid_size: f64,
    pub best_ask: f64,
    pub best_ask_size: f64,
    pub volume_24h: f64,
    pub price_change_24h: f64,
    pub price_change_pct_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
}

/// OHLC candle. Open and close times come from the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub venue: VenueId,
    pub symbol: String,
    pub interval: String,
    pub open_time_ns: i64,
    pub close_time_ns: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: i64,
}

/// Whether a book update replaces the book or amends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookUpdateKind {
    Snapshot,
    Delta,
}

/// Level-2 order book snapshot or delta.
///
/// A size of 0 at a level means that level is deleted. `sequence` is the
/// venue-assigned update id; 0 when the venue did not provide one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub venue: VenueId,
    pub symbol: String,
    pub kind: BookUpdateKind,
    pub timestamp_ns: i64,
    pub sequence: i64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_from_str() {
        assert_eq!(Side::from_str("buy"), Side::Buy);
        assert_eq!(Side::from_str("SELL"), Side::Sell);
        assert_eq!(Side::from_str("maker"), Side::Unknown);
    }

    #[test]
    fn test_trade_round_trips_through_json() {
        let trade = Trade {
            venue: VenueId::Binance,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            price: 65000.10,
            quantity: 0.25,
            trade_time_ns: 1_700_000_000_000_000_000,
        };

        let json = serde_json::to_string(&trade).unwrap();
        let back: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trade);
    }
}
