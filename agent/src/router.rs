use thiserror::Error;

use market_core::{Side, VenueId};

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("router unavailable")]
    Unavailable,
}

/// A request to trade, produced by strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub venue: VenueId,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
}

/// Execution surface handed to strategies. Routing, risk and order
/// management live behind this call elsewhere.
pub trait ExecutionRouter: Send + Sync {
    fn submit(&self, intent: OrderIntent) -> Result<(), RouterError>;
}

/// Reference router that records intents in the log and accepts them.
pub struct LogRouter;

impl ExecutionRouter for LogRouter {
    fn submit(&self, intent: OrderIntent) -> Result<(), RouterError> {
        tracing::info!(
            venue = %intent.venue,
            symbol = %intent.symbol,
            side = ?intent.side,
            price = intent.price,
            quantity = intent.quantity,
            "order intent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_router_accepts() {
        let intent = OrderIntent {
            venue: VenueId::Binance,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            price: 100.0,
            quantity: 1.0,
        };
        assert!(LogRouter.submit(intent).is_ok());
    }
}
