//! Trade event representation.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeType {
    Buy,
    Sell,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "BUY",
            TradeType::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized trade type: {0:?}")]
pub struct UnknownTradeType(pub String);

impl FromStr for TradeType {
    type Err = UnknownTradeType;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(TradeType::Buy),
            "SELL" => Ok(TradeType::Sell),
            _ => Err(UnknownTradeType(s.to_string())),
        }
    }
}

/// A single executed trade. Immutable once built; the trade index owns it
/// until eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub trade_type: TradeType,
    pub volume: f64,
    pub time: DateTime<Utc>,
}

impl TradeEvent {
    pub fn new(trade_type: TradeType, volume: f64, time: DateTime<Utc>) -> Self {
        Self {
            trade_type,
            volume,
            time,
        }
    }
}
