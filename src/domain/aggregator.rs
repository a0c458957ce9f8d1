//! Window aggregation: volumes and per-window realized P&L.

use crate::domain::trade::{TradeEvent, TradeType};
use crate::domain::window::{CalculationResult, MarketWindow};
use chrono::{DateTime, Utc};

/// Reduce `trades` into buy/sell volume and P&L for `window`.
///
/// `profit_loss = sell_volume * sell_price - buy_volume * buy_price`. Each
/// window stands alone; no position is carried between windows. Trades outside
/// `[start_time, end_time]` are ignored. `calculated_at` is supplied by the
/// caller so the function stays deterministic.
pub fn compute(
    window: &MarketWindow,
    trades: &[TradeEvent],
    calculated_at: DateTime<Utc>,
) -> CalculationResult {
    let (buy_volume, sell_volume) =
        trades
            .iter()
            .filter(|trade| window.contains(trade.time))
            .fold((0.0, 0.0), |(buy, sell), trade| match trade.trade_type {
                TradeType::Buy => (buy + trade.volume, sell),
                TradeType::Sell => (buy, sell + trade.volume),
            });

    let profit_loss = sell_volume * window.sell_price - buy_volume * window.buy_price;

    CalculationResult {
        start_time: window.start_time,
        end_time: window.end_time,
        buy_price: window.buy_price,
        sell_price: window.sell_price,
        buy_volume,
        sell_volume,
        profit_loss,
        calculated_at,
    }
}
