//! REST snapshot fetchers for order-book recovery.
//!
//! Fetches run on the recovery thread, never on the reactor, so each
//! fetcher uses a blocking HTTP client. A fresh request per fetch is
//! acceptable; recovery is rare.

use serde::de::IgnoredAny;
use serde::Deserialize;

use market_core::PriceLevel;

use crate::error::SnapshotError;

/// A full L2 book used to (re)initialize the reconstructor.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub sequence: i64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

pub trait SnapshotFetcher: Send + Sync {
    fn fetch(&self, symbol: &str) -> Result<BookSnapshot, SnapshotError>;
}

fn parse_level(price: &str, size: &str) -> Result<PriceLevel, SnapshotError> {
    let price: f64 = price
        .parse()
        .map_err(|_| SnapshotError::Malformed(format!("bad price {price:?}")))?;
    let size: f64 = size
        .parse()
        .map_err(|_| SnapshotError::Malformed(format!("bad size {size:?}")))?;
    Ok((price, size))
}

/// `GET {base}/products/{product_id}/book?level=2`
///
/// A fresh client per request: fetchers are constructed on the reactor
/// thread but only ever called from the recovery thread.
pub struct CoinbaseSnapshotFetcher {
    base_url: String,
}

#[derive(Deserialize)]
struct CoinbaseBook {
    sequence: i64,
    bids: Vec<(String, String, IgnoredAny)>,
    asks: Vec<(String, String, IgnoredAny)>,
}

impl CoinbaseSnapshotFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        CoinbaseSnapshotFetcher {
            base_url: base_url.into(),
        }
    }
}

impl SnapshotFetcher for CoinbaseSnapshotFetcher {
    fn fetch(&self, symbol: &str) -> Result<BookSnapshot, SnapshotError> {
        let url = format!("{}/products/{}/book?level=2", self.base_url, symbol);
        let client = reqwest::blocking::Client::new();
        let book: CoinbaseBook = client.get(&url).send()?.error_for_status()?.json()?;

        let bids = book
            .bids
            .iter()
            .map(|(p, s, _)| parse_level(p, s))
            .collect::<Result<_, _>>()?;
        let asks = book
            .asks
            .iter()
            .map(|(p, s, _)| parse_level(p, s))
            .collect::<Result<_, _>>()?;

        Ok(BookSnapshot {
            sequence: book.sequence,
            bids,
            asks,
        })
    }
}

/// `GET {base}/api/v3/depth?symbol={symbol}&limit=1000`
pub struct BinanceSnapshotFetcher {
    base_url: String,
}

#[derive(Deserialize)]
struct BinanceDepth {
    #[serde(rename = "lastUpdateId")]
    last_update_id: i64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

impl BinanceSnapshotFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        BinanceSnapshotFetcher {
            base_url: base_url.into(),
        }
    }
}

impl SnapshotFetcher for BinanceSnapshotFetcher {
    fn fetch(&self, symbol: &str) -> Result<BookSnapshot, SnapshotError> {
        let url = format!("{}/api/v3/depth?symbol={}&limit=1000", self.base_url, symbol);
        let client = reqwest::blocking::Client::new();
        let depth: BinanceDepth = client.get(&url).send()?.error_for_status()?.json()?;

        let bids = depth
            .bids
            .iter()
            .map(|[p, s]| parse_level(p, s))
            .collect::<Result<_, _>>()?;
        let asks = depth
            .asks
            .iter()
            .map(|[p, s]| parse_level(p, s))
            .collect::<Result<_, _>>()?;

        Ok(BookSnapshot {
            sequence: depth.last_update_id,
            bids,
            asks,
        })
    }
}
