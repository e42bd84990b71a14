//! Coinbase normalizer.
//!
//! Messages carry a top-level `"type"`. The level-2 channel sends one
//! full `snapshot` followed by `l2update` deltas whose `changes` entries
//! are `[side, price, size]` triples.

use market_core::{time, BookUpdate, BookUpdateKind, PriceLevel, Side, Ticker, Trade, VenueId};

use crate::bus::EventBus;
use crate::scan;

use super::{opt_f64, opt_i64, required_f64, required_str, value_slice, FrameError, Normalize};

pub struct CoinbaseNormalizer;

impl Normalize for CoinbaseNormalizer {
    fn venue(&self) -> VenueId {
        VenueId::Coinbase
    }

    fn apply(&self, frame: &str, bus: &EventBus) -> Result<(), FrameError> {
        let buf = frame.as_bytes();
        let Some(type_pos) = scan::find_value_after_key(buf, "type") else {
            return Ok(());
        };

        match scan::str_value(buf, type_pos) {
            "match" | "last_match" => self.trade(frame, buf, bus),
            "ticker" => self.ticker(buf, bus),
            "l2update" => self.l2update(buf, bus),
            "snapshot" => self.snapshot(buf, bus),
            // Control traffic and unhandled full-channel messages.
            _ => Ok(()),
        }
    }
}

impl CoinbaseNormalizer {
    fn trade(&self, frame: &str, buf: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        let symbol = required_str(buf, "product_id")?;
        let price = required_f64(buf, "price")?;
        let quantity = required_f64(buf, "size")?;
        let side = scan::find_value_after_key(buf, "side")
            .map(|pos| Side::from_str(scan::str_value(buf, pos)))
            .unwrap_or(Side::Unknown);

        debug_assert!(scan::verify::f64_matches(frame, "price", price));
        debug_assert!(scan::verify::f64_matches(frame, "size", quantity));

        bus.publish(&Trade {
            venue: self.venue(),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            // Stamped at parse time; the venue's ISO "time" field is
            // not propagated onto trades.
            trade_time_ns: time::now_ns(),
        });
        Ok(())
    }

    fn ticker(&self, buf: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        let symbol = required_str(buf, "product_id")?;
        let last_price = required_f64(buf, "price")?;

        // Coinbase sends the 24h open, not a change; derive both change
        // fields from it.
        let open_24h = opt_f64(buf, "open_24h");
        let price_change_24h = if open_24h != 0.0 {
            last_price - open_24h
        } else {
            0.0
        };
        let price_change_pct_24h = if open_24h != 0.0 {
            price_change_24h / open_24h
        } else {
            0.0
        };

        bus.publish(&Ticker {
            venue: self.venue(),
            symbol: symbol.to_string(),
            timestamp_ns: time::now_ns(),
            last_price,
            best_bid: opt_f64(buf, "best_bid"),
            best_bid_size: opt_f64(buf, "best_bid_size"),
            best_ask: opt_f64(buf, "best_ask"),
            best_ask_size: opt_f64(buf, "best_ask_size"),
            volume_24h: opt_f64(buf, "volume_24h"),
            price_change_24h,
            price_change_pct_24h,
            high_24h: opt_f64(buf, "high_24h"),
            low_24h: opt_f64(buf, "low_24h"),
        });
        Ok(())
    }

    fn l2update(&self, buf: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        let symbol = required_str(buf, "product_id")?;
        let changes = value_slice(buf, "changes").ok_or(FrameError("changes"))?;
        let (bids, asks) = parse_changes(changes);

        bus.publish(&BookUpdate {
            venue: self.venue(),
            symbol: symbol.to_string(),
            kind: BookUpdateKind::Delta,
            timestamp_ns: time::now_ns(),
            sequence: opt_i64(buf, "sequence"),
            bids,
            asks,
        });
        Ok(())
    }

    fn snapshot(&self, buf: &[u8], bus: &EventBus) -> Result<(), FrameError> {
        let symbol = required_str(buf, "product_id")?;
        let bids = value_slice(buf, "bids")
            .map(scan::parse_price_qty_array)
            .unwrap_or_default();
        let asks = value_slice(buf, "asks")
            .map(scan::parse_price_qty_array)
            .unwrap_or_default();

        bus.publish(&BookUpdate {
            venue: self.venue(),
            symbol: symbol.to_string(),
            kind: BookUpdateKind::Snapshot,
            timestamp_ns: time::now_ns(),
            // WS snapshots carry no sequence; the reconstructor adopts
            // the next delta's sequence as its baseline.
            sequence: opt_i64(buf, "sequence"),
            bids,
            asks,
        });
        Ok(())
    }
}

/// Split `changes` entries (`["buy"|"sell", price, size]`) into bid and
/// ask level lists.
fn parse_changes(buf: &[u8]) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
    let mut bids = Vec::new();
    let mut asks = Vec::new();

    let mut p = usize::from(buf.first() == Some(&b'['));
    while p < buf.len() {
        if buf[p] == b'[' {
            let end = scan::balanced_end(buf, p);
            let entry = &buf[p..end];

            let mut tokens = [""; 3];
            let mut count = 0;
            let mut q = 0;
            while count < 3 {
                let Some(open) = entry[q..].iter().position(|&b| b == b'"') else {
                    break;
                };
                let start = q + open + 1;
                let Some(close) = entry[start..].iter().position(|&b| b == b'"') else {
                    break;
                };
                tokens[count] = std::str::from_utf8(&entry[start..start + close]).unwrap_or("");
                count += 1;
                q = start + close + 1;
            }

            if count == 3 {
                let price = scan::parse_double(tokens[1].as_bytes());
                let size = scan::parse_double(tokens[2].as_bytes());
                match tokens[0] {
                    "buy" => bids.push((price, size)),
                    "sell" => asks.push((price, size)),
                    _ => {}
                }
            }
            p = end;
        } else {
            p += 1;
        }
    }

    (bids, asks)
}
