//! Durable storage port for window results.

use crate::domain::error::TradeWindowError;
use crate::domain::window::CalculationResult;

/// Backing store for [`CalculationResult`]s.
///
/// Implementations must enforce uniqueness on `(start_time, end_time)`:
/// `upsert` for an existing identity overwrites the stored values.
pub trait ResultSink {
    fn upsert(&self, result: &CalculationResult) -> Result<(), TradeWindowError>;

    /// Most recent windows first (descending `start_time`).
    fn list_recent(&self, limit: usize) -> Result<Vec<CalculationResult>, TradeWindowError>;

    fn count(&self) -> Result<usize, TradeWindowError>;
}
