//! Typed in-process publish/subscribe.
//!
//! One handler list per normalized event type, invoked synchronously on
//! the publishing (parser) thread in registration order. Subscriptions
//! happen during startup; after that the read-locked publish path is
//! uncontended. A panicking handler is caught and counted so the
//! remaining handlers still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use market_core::{BookUpdate, Candle, FeedStats, Ticker, Trade};

type HandlerList<E> = RwLock<Vec<Box<dyn Fn(&E) + Send + Sync>>>;

pub struct EventBus {
    trades: HandlerList<Trade>,
    tickers: HandlerList<Ticker>,
    candles: HandlerList<Candle>,
    books: HandlerList<BookUpdate>,
    stats: Arc<FeedStats>,
}

/// Event types routable through the bus.
pub trait BusEvent: Sized {
    fn handlers(bus: &EventBus) -> &HandlerList<Self>;
}

impl BusEvent for Trade {
    fn handlers(bus: &EventBus) -> &HandlerList<Self> {
        &bus.trades
    }
}

impl BusEvent for Ticker {
    fn handlers(bus: &EventBus) -> &HandlerList<Self> {
        &bus.tickers
    }
}

impl BusEvent for Candle {
    fn handlers(bus: &EventBus) -> &HandlerList<Self> {
        &bus.candles
    }
}

impl BusEvent for BookUpdate {
    fn handlers(bus: &EventBus) -> &HandlerList<Self> {
        &bus.books
    }
}

impl EventBus {
    pub fn new(stats: Arc<FeedStats>) -> Self {
        EventBus {
            trades: RwLock::new(Vec::new()),
            tickers: RwLock::new(Vec::new()),
            candles: RwLock::new(Vec::new()),
            books: RwLock::new(Vec::new()),
            stats,
        }
    }

    /// Register a handler for event type `E`. Handlers run in
    /// registration order.
    pub fn subscribe<E: BusEvent>(&self, handler: impl Fn(&E) + Send + Sync + 'static) {
        E::handlers(self).write().push(Box::new(handler));
    }

    /// Synchronously invoke every handler registered for `E`, exactly
    /// once each, before returning.
    pub fn publish<E: BusEvent>(&self, event: &E) {
        let handlers = E::handlers(self).read();
        for handler in handlers.iter() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                self.stats.record_handler_panic();
                tracing::error!("event handler panicked; continuing dispatch");
            }
        }
    }

    pub fn handler_count<E: BusEvent>(&self) -> usize {
        E::handlers(self).read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::{Side, VenueId};
    use parking_lot::Mutex;

    fn sample_trade() -> Trade {
        Trade {
            venue: VenueId::Binance,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            price: 100.0,
            quantity: 1.0,
            trade_time_ns: 1,
        }
    }

    #[test]
    fn test_handlers_run_in_registration_order_exactly_once() {
        let bus = EventBus::new(Arc::new(FeedStats::new()));
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            bus.subscribe::<Trade>(move |_| calls.lock().push(tag));
        }

        bus.publish(&sample_trade());
        assert_eq!(*calls.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(Arc::new(FeedStats::new()));
        bus.publish(&sample_trade());
    }

    #[test]
    fn test_event_types_are_routed_independently() {
        let bus = EventBus::new(Arc::new(FeedStats::new()));
        let trades = Arc::new(Mutex::new(0u32));

        let counter = Arc::clone(&trades);
        bus.subscribe::<Trade>(move |_| *counter.lock() += 1);

        bus.publish(&Ticker {
            venue: VenueId::Kraken,
            symbol: "BTC/USD".to_string(),
            timestamp_ns: 0,
            last_price: 0.0,
            best_bid: 0.0,
            best_bid_size: 0.0,
            best_ask: 0.0,
            best_ask_size: 0.0,
            volume_24h: 0.0,
            price_change_24h: 0.0,
            price_change_pct_24h: 0.0,
            high_24h: 0.0,
            low_24h: 0.0,
        });
        assert_eq!(*trades.lock(), 0);

        bus.publish(&sample_trade());
        assert_eq!(*trades.lock(), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_dispatch() {
        let stats = Arc::new(FeedStats::new());
        let bus = EventBus::new(Arc::clone(&stats));
        let reached = Arc::new(Mutex::new(false));

        bus.subscribe::<Trade>(|_| panic!("boom"));
        let reached_clone = Arc::clone(&reached);
        bus.subscribe::<Trade>(move |_| *reached_clone.lock() = true);

        bus.publish(&sample_trade());

        assert!(*reached.lock());
        assert_eq!(stats.snapshot().handler_panics, 1);
    }
}
