use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The trading venues this system ingests.
///
/// The set is closed: every pipeline, normalizer and snapshot fetcher
/// is keyed by one of these, so an unknown venue is a configuration
/// error, not a runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    Binance,
    Coinbase,
    Kraken,
}

impl VenueId {
    pub const ALL: [VenueId; 3] = [VenueId::Binance, VenueId::Coinbase, VenueId::Kraken];

    pub fn as_str(self) -> &'static str {
        match self {
            VenueId::Binance => "binance",
            VenueId::Coinbase => "coinbase",
            VenueId::Kraken => "kraken",
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown venue `{0}`")]
pub struct UnknownVenue(pub String);

impl FromStr for VenueId {
    type Err = UnknownVenue;

    fn from_str(s: &str) -> Result<Self, UnknownVenue> {
        VenueId::ALL
            .into_iter()
            .find(|venue| venue.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownVenue(s.to_string()))
    }
}

/// An instrument under one venue's symbology, e.g. the same asset is
/// `BTCUSDT` on Binance, `BTC-USD` on Coinbase and `BTC/USD` on
/// Kraken. Symbols are stored uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedSymbol {
    pub venue: VenueId,
    pub symbol: String,
}

impl QualifiedSymbol {
    pub fn new(venue: VenueId, symbol: impl Into<String>) -> Self {
        QualifiedSymbol {
            venue,
            symbol: symbol.into().to_uppercase(),
        }
    }
}

impl fmt::Display for QualifiedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_parse_display_round_trip() {
        for venue in VenueId::ALL {
            assert_eq!(venue.as_str().parse::<VenueId>(), Ok(venue));
            assert_eq!(venue.to_string(), venue.as_str());
        }
        // Case-insensitive on the way in.
        assert_eq!("Kraken".parse::<VenueId>(), Ok(VenueId::Kraken));
    }

    #[test]
    fn test_unknown_venue_is_an_error() {
        let err = "bitmex".parse::<VenueId>().unwrap_err();
        assert_eq!(err, UnknownVenue("bitmex".to_string()));
        assert_eq!(err.to_string(), "unknown venue `bitmex`");
    }

    #[test]
    fn test_venue_serializes_as_lowercase_string() {
        assert_eq!(
            serde_json::to_string(&VenueId::Coinbase).unwrap(),
            r#""coinbase""#
        );
        let back: VenueId = serde_json::from_str(r#""kraken""#).unwrap();
        assert_eq!(back, VenueId::Kraken);
    }

    #[test]
    fn test_qualified_symbol_uppercases_per_venue_symbology() {
        let sym = QualifiedSymbol::new(VenueId::Kraken, "btc/usd");
        assert_eq!(sym.symbol, "BTC/USD");
        assert_eq!(sym.to_string(), "kraken:BTC/USD");
        assert_ne!(sym, QualifiedSymbol::new(VenueId::Coinbase, "BTC/USD"));
    }
}
