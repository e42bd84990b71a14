use market_core::{time, BookUpdate, Candle, Ticker, Trade};
use market_feed::EventBus;

/// Logger consumer: one structured record per normalized event. Each
/// record carries the nanoseconds elapsed between the parser observing
/// the frame and the record being written.
pub struct LoggerSink;

impl LoggerSink {
    pub fn subscribe_to(bus: &EventBus) {
        bus.subscribe::<Trade>(|t| {
            let elapsed_ns = time::now_ns() - t.trade_time_ns;
            tracing::info!(
                target: "events",
                venue = %t.venue,
                symbol = %t.symbol,
                side = ?t.side,
                price = t.price,
                quantity = t.quantity,
                trade_time_ns = t.trade_time_ns,
                elapsed_ns,
                "trade"
            );
        });

        bus.subscribe::<Ticker>(|t| {
            let elapsed_ns = time::now_ns() - t.timestamp_ns;
            tracing::info!(
                target: "events",
                venue = %t.venue,
                symbol = %t.symbol,
                last_price = t.last_price,
                best_bid = t.best_bid,
                best_ask = t.best_ask,
                high_24h = t.high_24h,
                low_24h = t.low_24h,
                price_change_24h = t.price_change_24h,
                elapsed_ns,
                "ticker"
            );
        });

        bus.subscribe::<Candle>(|c| {
            tracing::info!(
                target: "events",
                venue = %c.venue,
                symbol = %c.symbol,
                interval = %c.interval,
                open_time_ns = c.open_time_ns,
                close_time_ns = c.close_time_ns,
                open = c.open,
                high = c.high,
                low = c.low,
                close = c.close,
                volume = c.volume,
                trade_count = c.trade_count,
                "candle"
            );
        });

        bus.subscribe::<BookUpdate>(|b| {
            let elapsed_ns = time::now_ns() - b.timestamp_ns;
            tracing::info!(
                target: "events",
                venue = %b.venue,
                symbol = %b.symbol,
                kind = ?b.kind,
                sequence = b.sequence,
                bid_levels = b.bids.len(),
                ask_levels = b.asks.len(),
                elapsed_ns,
                "book update"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::FeedStats;
    use std::sync::Arc;

    #[test]
    fn test_sink_installs_a_handler_per_event_type() {
        let bus = EventBus::new(Arc::new(FeedStats::new()));
        LoggerSink::subscribe_to(&bus);

        assert_eq!(bus.handler_count::<Trade>(), 1);
        assert_eq!(bus.handler_count::<Ticker>(), 1);
        assert_eq!(bus.handler_count::<Candle>(), 1);
        assert_eq!(bus.handler_count::<BookUpdate>(), 1);
    }
}
