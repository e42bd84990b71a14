//! Reference strategy: cross-venue arbitrage on top-of-book depth.
//!
//! Watches the reconstructed books of the same instrument on two
//! venues. When one venue's ask crosses the other's bid by more than
//! the proportional fee, it sizes at the smaller of the two levels and
//! submits both legs to the execution router.

use std::sync::Arc;

use market_core::{BookUpdate, PriceLevel, QualifiedSymbol, Side};
use market_feed::{BookManager, EventBus};

use crate::router::{ExecutionRouter, OrderIntent};

/// A detected opportunity: buy at `price_buy`, sell at `price_sell`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOpportunity {
    pub price_buy: f64,
    pub price_sell: f64,
    pub volume: f64,
    pub expected_profit: f64,
}

/// Scan up to `depth` ask levels on the buy venue against `depth` bid
/// levels on the sell venue. The fee is charged proportionally on the
/// mid of the two prices. Returns the most profitable combination, or
/// `None` when nothing nets positive.
pub fn should_trade(
    asks: &[PriceLevel],
    bids: &[PriceLevel],
    fee: f64,
    depth: usize,
) -> Option<TradeOpportunity> {
    let depth = depth.min(asks.len()).min(bids.len());
    let mut best = TradeOpportunity {
        price_buy: 0.0,
        price_sell: 0.0,
        volume: 0.0,
        expected_profit: 0.0,
    };

    for &(ask_price, ask_vol) in &asks[..depth] {
        for &(bid_price, bid_vol) in &bids[..depth] {
            let tradable_vol = ask_vol.min(bid_vol);
            let spread = bid_price - ask_price;
            let adjusted = spread - fee * (ask_price + bid_price) / 2.0;
            let profit = adjusted * tradable_vol;

            if profit > best.expected_profit {
                best = TradeOpportunity {
                    price_buy: ask_price,
                    price_sell: bid_price,
                    volume: tradable_vol,
                    expected_profit: profit,
                };
            }
        }
    }

    (best.expected_profit > 0.0).then_some(best)
}

pub struct CrossVenueArb {
    leg_a: QualifiedSymbol,
    leg_b: QualifiedSymbol,
    fee: f64,
    depth: usize,
    router: Arc<dyn ExecutionRouter>,
}

impl CrossVenueArb {
    pub fn new(
        leg_a: QualifiedSymbol,
        leg_b: QualifiedSymbol,
        fee: f64,
        depth: usize,
        router: Arc<dyn ExecutionRouter>,
    ) -> Self {
        CrossVenueArb {
            leg_a,
            leg_b,
            fee,
            depth,
            router,
        }
    }

    /// Re-evaluate on every book update touching either leg. Must be
    /// registered after the book manager so the books are current.
    pub fn subscribe_to(self: Arc<Self>, bus: &EventBus, books: Arc<BookManager>) {
        bus.subscribe::<BookUpdate>(move |update| {
            let key = QualifiedSymbol::new(update.venue, &update.symbol);
            if key != self.leg_a && key != self.leg_b {
                return;
            }
            self.evaluate(&books);
        });
    }

    fn evaluate(&self, books: &BookManager) {
        let Some((bids_a, asks_a)) = books.top_levels(&self.leg_a, self.depth) else {
            return;
        };
        let Some((bids_b, asks_b)) = books.top_levels(&self.leg_b, self.depth) else {
            return;
        };

        let forward = should_trade(&asks_a, &bids_b, self.fee, self.depth);
        let reverse = should_trade(&asks_b, &bids_a, self.fee, self.depth);

        match (forward, reverse) {
            (Some(f), Some(r)) => {
                if f.expected_profit >= r.expected_profit {
                    self.execute(&self.leg_a, &self.leg_b, &f);
                } else {
                    self.execute(&self.leg_b, &self.leg_a, &r);
                }
            }
            (Some(f), None) => self.execute(&self.leg_a, &self.leg_b, &f),
            (None, Some(r)) => self.execute(&self.leg_b, &self.leg_a, &r),
            (None, None) => {}
        }
    }

    fn execute(&self, buy: &QualifiedSymbol, sell: &QualifiedSymbol, opp: &TradeOpportunity) {
        tracing::info!(
            buy = %buy,
            sell = %sell,
            price_buy = opp.price_buy,
            price_sell = opp.price_sell,
            volume = opp.volume,
            expected_profit = opp.expected_profit,
            "arbitrage opportunity"
        );

        let buy_leg = OrderIntent {
            venue: buy.venue,
            symbol: buy.symbol.clone(),
            side: Side::Buy,
            price: opp.price_buy,
            quantity: opp.volume,
        };
        let sell_leg = OrderIntent {
            venue: sell.venue,
            symbol: sell.symbol.clone(),
            side: Side::Sell,
            price: opp.price_sell,
            quantity: opp.volume,
        };

        for leg in [buy_leg, sell_leg] {
            if let Err(err) = self.router.submit(leg) {
                tracing::error!(error = %err, "order submission failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_trade_nets_fee_on_mid() {
        // Buy one at 100, sell one into the 101 bid, 0.1% fee on the
        // 100.5 mid: profit = (1 - 0.1005) * 1 = 0.8995.
        let asks = [(100.0, 1.0)];
        let bids = [(101.0, 2.0)];

        let opp = should_trade(&asks, &bids, 0.001, 5).unwrap();
        assert_eq!(opp.price_buy, 100.0);
        assert_eq!(opp.price_sell, 101.0);
        assert_eq!(opp.volume, 1.0);
        assert!((opp.expected_profit - 0.8995).abs() < 1e-9);
    }

    #[test]
    fn test_no_opportunity_when_fee_eats_spread() {
        let asks = [(100.0, 1.0)];
        let bids = [(100.05, 1.0)];
        assert!(should_trade(&asks, &bids, 0.001, 5).is_none());
    }

    #[test]
    fn test_scan_is_bounded_to_depth() {
        // The only profitable bid sits below the scan depth.
        let asks = [(100.0, 1.0); 6];
        let mut bids = [(99.0, 1.0); 6];
        bids[5] = (200.0, 1.0);

        assert!(should_trade(&asks, &bids, 0.0, 5).is_none());
    }

    #[test]
    fn test_best_combination_wins() {
        let asks = [(100.0, 1.0), (100.5, 10.0)];
        let bids = [(102.0, 0.1), (101.5, 10.0)];

        // 100.5 -> 101.5 on 10 units beats 100 -> 102 on 0.1 units.
        let opp = should_trade(&asks, &bids, 0.0, 5).unwrap();
        assert_eq!(opp.price_buy, 100.5);
        assert_eq!(opp.price_sell, 101.5);
        assert_eq!(opp.volume, 10.0);
        assert!((opp.expected_profit - 10.0).abs() < 1e-9);
    }
}
