//! Running open-position tracker.
//!
//! Accumulates total bought and sold volume across every trade the process
//! has ingested. Independent of window P&L.

use crate::domain::trade::{TradeEvent, TradeType};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSnapshot {
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub trade_count: u64,
}

impl PositionSnapshot {
    /// Bought minus sold volume; negative when net short.
    pub fn open_position(&self) -> f64 {
        self.buy_volume - self.sell_volume
    }
}

#[derive(Debug, Default)]
pub struct PositionTracker {
    state: Mutex<PositionSnapshot>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &TradeEvent) {
        let mut state = self.state.lock();
        match event.trade_type {
            TradeType::Buy => state.buy_volume += event.volume,
            TradeType::Sell => state.sell_volume += event.volume,
        }
        state.trade_count += 1;
    }

    pub fn open_position(&self) -> f64 {
        self.state.lock().open_position()
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        *self.state.lock()
    }
}
