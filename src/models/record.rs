//! The unified record shape and the natural key that identifies it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A source-provided row before it has been mapped onto the unified schema.
/// Field values are kept dynamically typed because each source's payload
/// shape is not under our control.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// The three configured crypto data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    A,
    B,
    C,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::A, Source::B, Source::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::A => "A",
            Source::B => "B",
            Source::C => "C",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Source::A),
            "B" => Ok(Source::B),
            "C" => Ok(Source::C),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// `(symbol, timestamp, source)`: the unique identity of a market snapshot,
/// enforced by a unique index on both the raw and normalized collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
}

/// The canonical shape written to both the raw mirror and the normalized
/// collection. `market_cap` and `percent_change_24h` are genuinely optional
/// fields in the source data, never a stand-in `0.0` for "missing".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRecord {
    pub symbol: String,
    pub name: String,
    pub price_usd: f64,
    pub volume_24h: f64,
    pub market_cap: Option<f64>,
    pub percent_change_24h: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
}

impl UnifiedRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            source: self.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_round_trips_through_str() {
        for s in Source::ALL {
            let parsed: Source = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn source_parse_is_case_insensitive() {
        assert_eq!("a".parse::<Source>().unwrap(), Source::A);
        assert_eq!("c".parse::<Source>().unwrap(), Source::C);
        assert!("d".parse::<Source>().is_err());
    }
}
