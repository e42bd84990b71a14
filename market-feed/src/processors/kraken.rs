//! Kraken v2 normalizer.
//!
//! Data frames carry `"channel"` plus `"type"` (`snapshot` or `update`)
//! and a `"data"` array. Book levels are objects with `price`/`qty`
//! fields; timestamps are ISO-8601 strings interpreted as UTC.

use market_core::{time, BookUpdate, BookUpdateKind, Candle, Side, Ticker, Trade, VenueId};

use crate::bus::EventBus;
use crate::scan;

use super::{opt_f64, opt_i64, required_f64, required_str, value_slice, FrameError, Normalize};

pub struct KrakenNormalizer;

impl Normalize for KrakenNormalizer {
    fn venue(&self) -> VenueId {
        VenueId::Kraken
    }

    fn apply(&self, frame: &str, bus: &EventBus) -> Result<(), FrameError> {
        let buf = frame.as_bytes();

        // Method acks, status and heartbeat frames have no channel or
        // carry no market data.
        let Some(channel_pos) = scan::find_value_after_key(buf, "channel") else {
            return Ok(());
        };
        let channel = scan::str_value(buf, channel_pos);

        let kind = match scan::find_value_after_key(buf, "type").map(|p| scan::str_value(buf, p)) {
            Some("update") => BookUpdateKind::Delta,
            Some("snapshot") => BookUpdateKind::Snapshot,
            _ => return Ok(()),
        };

        let Some(data) = value_slice(buf, "data") else {
            return Ok(());
        };

        match channel {
            "trade" => self.trades(data, bus),
            "ticker" => self.ticker(data, bus),
            "book" => self.book(data, kind, bus),
            "ohlc" => self.ohlc(data, bus),
            _ => Ok(()),
        }
    }
}

impl KrakenNormalizer {
    /// Walk the objects of a `data` array, applying `f` to each slice.
    fn for_each_entry(
        data: &[u8],
        mut f: impl FnMut(&[u8]) -> Result<(), FrameError>,
    ) -> Result<(), FrameError> {
        let mut p = 0;
        while p < data.len() {
            if data[p] == b'{' {
                let end = scan::balanced_end(data, p);
                f(&data[p..end])?;
                p = end;
            } else {
                p += 1;
            }
        }
        Ok(())
    }

    fn trades(&self, data: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        Self::for_each_entry(data, |entry| {
            let symbol = required_str(entry, "symbol")?;
            let price = required_f64(entry, "price")?;
            let quantity = required_f64(entry, "qty")?;
            let side = scan::find_value_after_key(entry, "side")
                .map(|pos| Side::from_str(scan::str_value(entry, pos)))
                .unwrap_or(Side::Unknown);

            bus.publish(&Trade {
                venue: self.venue(),
                symbol: symbol.to_string(),
                side,
                price,
                quantity,
                // Stamped at parse time; the venue's ISO timestamp is
                // only used for candle boundaries.
                trade_time_ns: time::now_ns(),
            });
            Ok(())
        })
    }

    fn ticker(&self, data: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        Self::for_each_entry(data, |entry| {
            let symbol = required_str(entry, "symbol")?;

            bus.publish(&Ticker {
                venue: self.venue(),
                symbol: symbol.to_string(),
                timestamp_ns: time::now_ns(),
                last_price: opt_f64(entry, "last"),
                best_bid: opt_f64(entry, "bid"),
                best_bid_size: opt_f64(entry, "bid_qty"),
                best_ask: opt_f64(entry, "ask"),
                best_ask_size: opt_f64(entry, "ask_qty"),
                volume_24h: opt_f64(entry, "volume"),
                price_change_24h: opt_f64(entry, "change"),
                price_change_pct_24h: opt_f64(entry, "change_pct"),
                high_24h: opt_f64(entry, "high"),
                low_24h: opt_f64(entry, "low"),
            });
            Ok(())
        })
    }

    fn book(&self, data: &[u8], kind: BookUpdateKind, bus: &EventBus) -> Result<(), FrameError> {
        Self::for_each_entry(data, |entry| {
            let symbol = required_str(entry, "symbol")?;
            let bids = value_slice(entry, "bids")
                .map(scan::parse_price_qty_array)
                .unwrap_or_default();
            let asks = value_slice(entry, "asks")
                .map(scan::parse_price_qty_array)
                .unwrap_or_default();

            bus.publish(&BookUpdate {
                venue: self.venue(),
                symbol: symbol.to_string(),
                kind,
                timestamp_ns: time::now_ns(),
                // Kraken numbers book updates with a checksum, not a
                // sequence; the reconstructor applies these untracked.
                sequence: 0,
                bids,
                asks,
            });
            Ok(())
        })
    }

    fn ohlc(&self, data: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        Self::for_each_entry(data, |entry| {
            let symbol = required_str(entry, "symbol")?;

            let open_time_ns = scan::find_value_after_key(entry, "interval_begin")
                .map(|pos| scan::parse_iso8601_to_ns(&entry[pos..]))
                .unwrap_or(0);
            let close_time_ns = scan::find_value_after_key(entry, "timestamp")
                .map(|pos| scan::parse_iso8601_to_ns(&entry[pos..]))
                .unwrap_or(0);

            bus.publish(&Candle {
                venue: self.venue(),
                symbol: symbol.to_string(),
                interval: format!("{}m", opt_i64(entry, "interval")),
                open_time_ns,
                close_time_ns,
                open: opt_f64(entry, "open"),
                high: opt_f64(entry, "high"),
                low: opt_f64(entry, "low"),
                close: opt_f64(entry, "close"),
                volume: opt_f64(entry, "volume"),
                trade_count: opt_i64(entry, "trades"),
            });
            Ok(())
        })
    }
}
