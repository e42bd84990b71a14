//! Frame processors: pop from the ring, normalize per venue dialect,
//! publish to the bus.
//!
//! The pop loop runs on the pinned parser thread. An empty ring costs a
//! 10 µs cooperative sleep; a frame that fails to normalize is counted
//! and dropped, never propagated.

mod binance;
mod coinbase;
mod kraken;

pub use binance::BinanceNormalizer;
pub use coinbase::CoinbaseNormalizer;
pub use kraken::KrakenNormalizer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use market_core::{FeedStats, VenueId};

use crate::bus::EventBus;
use crate::ring;
use crate::scan;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("missing or malformed field `{0}`")]
pub struct FrameError(pub &'static str);

/// Venue-dialect normalizer: recognizes the frame's event discriminator
/// and publishes normalized events. Unknown discriminators are ignored
/// silently (`Ok` with no events).
pub trait Normalize: Send + 'static {
    fn venue(&self) -> VenueId;
    fn apply(&self, frame: &str, bus: &EventBus) -> Result<(), FrameError>;
}

#[derive(Clone)]
pub struct ProcessorHandle {
    running: Arc<AtomicBool>,
}

impl ProcessorHandle {
    /// Ask the processor to exit once the ring is drained.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Consumer half of a venue pipeline: ring consumer + normalizer.
pub struct Processor<N: Normalize> {
    consumer: ring::Consumer<String>,
    normalizer: N,
    bus: Arc<EventBus>,
    stats: Arc<FeedStats>,
    running: Arc<AtomicBool>,
}

impl<N: Normalize> Processor<N> {
    pub fn new(
        consumer: ring::Consumer<String>,
        normalizer: N,
        bus: Arc<EventBus>,
        stats: Arc<FeedStats>,
    ) -> Self {
        Processor {
            consumer,
            normalizer,
            bus,
            stats,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn handle(&self) -> ProcessorHandle {
        ProcessorHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Pop-and-publish until stopped. After `stop` the remaining frames
    /// are drained before exit.
    pub fn run(&mut self) {
        const IDLE_SLEEP: Duration = Duration::from_micros(10);

        loop {
            match self.consumer.try_pop() {
                Some(frame) => {
                    self.stats.record_popped();
                    if let Err(err) = self.normalizer.apply(&frame, &self.bus) {
                        self.stats.record_parse_failure();
                        tracing::trace!(
                            venue = %self.normalizer.venue(),
                            reason = %err,
                            "dropping unparseable frame"
                        );
                    }
                }
                None => {
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    std::thread::sleep(IDLE_SLEEP);
                }
            }
        }
    }
}

// Shared field-extraction helpers for the venue normalizers.

fn required(buf: &[u8], key: &'static str) -> Result<usize, FrameError> {
    scan::find_value_after_key(buf, key).ok_or(FrameError(key))
}

fn required_str<'a>(buf: &'a [u8], key: &'static str) -> Result<&'a str, FrameError> {
    let pos = required(buf, key)?;
    let value = scan::str_value(buf, pos);
    if value.is_empty() {
        return Err(FrameError(key));
    }
    Ok(value)
}

fn required_f64(buf: &[u8], key: &'static str) -> Result<f64, FrameError> {
    let pos = required(buf, key)?;
    Ok(scan::parse_double(&buf[pos..]))
}

fn opt_f64(buf: &[u8], key: &str) -> f64 {
    scan::find_value_after_key(buf, key)
        .map(|pos| scan::parse_double(&buf[pos..]))
        .unwrap_or(0.0)
}

fn opt_i64(buf: &[u8], key: &str) -> i64 {
    scan::find_value_after_key(buf, key)
        .map(|pos| scan::parse_int64(&buf[pos..]))
        .unwrap_or(0)
}

/// Slice out a bracketed value (`[...]` or `{...}`) for a key.
fn value_slice<'a>(buf: &'a [u8], key: &str) -> Option<&'a [u8]> {
    let pos = scan::find_value_after_key(buf, key)?;
    if !matches!(buf.get(pos), Some(b'[') | Some(b'{')) {
        return None;
    }
    Some(&buf[pos..scan::balanced_end(buf, pos)])
}
