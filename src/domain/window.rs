//! Market windows and their computed results.

use crate::domain::error::TradeWindowError;
use chrono::{DateTime, Utc};

/// A priced time interval. Transient: built from a market message and
/// consumed by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub buy_price: f64,
    pub sell_price: f64,
}

impl MarketWindow {
    /// Enforces `start_time <= end_time` and finite, non-negative prices.
    pub fn new(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        buy_price: f64,
        sell_price: f64,
    ) -> Result<Self, TradeWindowError> {
        if start_time > end_time {
            return Err(TradeWindowError::validation(
                "startTime",
                format!("startTime {start_time} is after endTime {end_time}"),
            ));
        }
        check_price("buyPrice", buy_price)?;
        check_price("sellPrice", sell_price)?;
        Ok(Self {
            start_time,
            end_time,
            buy_price,
            sell_price,
        })
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start_time <= time && time <= self.end_time
    }
}

fn check_price(field: &str, value: f64) -> Result<(), TradeWindowError> {
    if !value.is_finite() {
        return Err(TradeWindowError::validation(field, "must be finite"));
    }
    if value < 0.0 {
        return Err(TradeWindowError::validation(field, "must be non-negative"));
    }
    Ok(())
}

/// Aggregated outcome of one window. Identity is `(start_time, end_time)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationResult {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub buy_price: f64,
    pub sell_price: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub profit_loss: f64,
    pub calculated_at: DateTime<Utc>,
}

impl CalculationResult {
    pub fn identity(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start_time, self.end_time)
    }
}
