//! Binance combined-stream normalizer.
//!
//! Envelope: `{"stream":"...","data":{...}}` with the event type at
//! `data.e` and single-letter field keys.

use market_core::{time, BookUpdate, BookUpdateKind, Candle, Side, Ticker, Trade, VenueId};

use crate::bus::EventBus;
use crate::scan;

use super::{opt_f64, opt_i64, required, required_f64, required_str, value_slice, FrameError, Normalize};

pub struct BinanceNormalizer;

impl Normalize for BinanceNormalizer {
    fn venue(&self) -> VenueId {
        VenueId::Binance
    }

    fn apply(&self, frame: &str, bus: &EventBus) -> Result<(), FrameError> {
        let buf = frame.as_bytes();

        // Control frames (subscribe responses) have no data envelope.
        let Some(data_pos) = scan::find_value_after_key(buf, "data") else {
            return Ok(());
        };
        let data = &buf[data_pos..];

        let Some(event_pos) = scan::find_value_after_key(data, "e") else {
            return Ok(());
        };

        match scan::str_value(data, event_pos) {
            "trade" => self.trade(frame, data, bus),
            "depthUpdate" => self.depth(data, bus),
            "24hrTicker" => self.ticker(data, bus),
            "kline" => self.kline(data, bus),
            _ => Ok(()),
        }
    }
}

impl BinanceNormalizer {
    fn trade(&self, frame: &str, data: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        let symbol = required_str(data, "s")?;
        let price = required_f64(data, "p")?;
        let quantity = required_f64(data, "q")?;

        // "m" is buyer-is-maker: the taker sold into the bid.
        let side = match scan::find_value_after_key(data, "m") {
            Some(pos) if data.get(pos) == Some(&b't') => Side::Sell,
            Some(_) => Side::Buy,
            None => Side::Unknown,
        };

        debug_assert!(scan::verify::f64_matches(frame, "p", price));
        debug_assert!(scan::verify::f64_matches(frame, "q", quantity));
        debug_assert!(scan::verify::str_matches(frame, "s", symbol));

        bus.publish(&Trade {
            venue: self.venue(),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            trade_time_ns: time::now_ns(),
        });
        Ok(())
    }

    fn depth(&self, data: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        let symbol = required_str(data, "s")?;
        // The final update id "u" is the delta's sequence; the first
        // update id "U" is only consumed during snapshot alignment and
        // is not stored.
        let sequence_pos = required(data, "u")?;
        let sequence = scan::parse_int64(&data[sequence_pos..]);

        let bids = value_slice(data, "b")
            .map(scan::parse_price_qty_array)
            .unwrap_or_default();
        let asks = value_slice(data, "a")
            .map(scan::parse_price_qty_array)
            .unwrap_or_default();

        bus.publish(&BookUpdate {
            venue: self.venue(),
            symbol: symbol.to_string(),
            kind: BookUpdateKind::Delta,
            timestamp_ns: time::now_ns(),
            sequence,
            bids,
            asks,
        });
        Ok(())
    }

    fn ticker(&self, data: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        let symbol = required_str(data, "s")?;

        bus.publish(&Ticker {
            venue: self.venue(),
            symbol: symbol.to_string(),
            timestamp_ns: time::now_ns(),
            last_price: opt_f64(data, "c"),
            best_bid: opt_f64(data, "b"),
            best_bid_size: opt_f64(data, "B"),
            best_ask: opt_f64(data, "a"),
            best_ask_size: opt_f64(data, "A"),
            volume_24h: opt_f64(data, "v"),
            price_change_24h: opt_f64(data, "p"),
            price_change_pct_24h: opt_f64(data, "P"),
            high_24h: opt_f64(data, "h"),
            low_24h: opt_f64(data, "l"),
        });
        Ok(())
    }

    fn kline(&self, data: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        let symbol = required_str(data, "s")?;
        let k = value_slice(data, "k").ok_or(FrameError("k"))?;
        let interval = required_str(k, "i")?;

        bus.publish(&Candle {
            venue: self.venue(),
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            // Candle boundaries are venue times (epoch milliseconds).
            open_time_ns: opt_i64(k, "t") * 1_000_000,
            close_time_ns: opt_i64(k, "T") * 1_000_000,
            open: opt_f64(k, "o"),
            high: opt_f64(k, "h"),
            low: opt_f64(k, "l"),
            close: opt_f64(k, "c"),
            volume: opt_f64(k, "v"),
            trade_count: opt_i64(k, "n"),
        });
        Ok(())
    }
}
