mod binance;
mod coinbase;
mod kraken;

pub use binance::BinanceDialect;
pub use coinbase::CoinbaseDialect;
pub use kraken::KrakenDialect;

use crate::session::VenueClient;

pub type BinanceClient = VenueClient<BinanceDialect>;
pub type CoinbaseClient = VenueClient<CoinbaseDialect>;
pub type KrakenClient = VenueClient<KrakenDialect>;
