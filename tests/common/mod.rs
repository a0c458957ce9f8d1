#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tradewindow::domain::dispatcher::Dispatcher;
use tradewindow::domain::error::TradeWindowError;
use tradewindow::domain::message::{RawMessage, Topic};
use tradewindow::domain::trade_index::TradeIndex;
use tradewindow::domain::window::CalculationResult;
use tradewindow::ports::result_sink::ResultSink;

/// In-memory sink keyed on window identity, recording every upsert call.
#[derive(Default)]
pub struct MemorySink {
    pub rows: Mutex<Vec<CalculationResult>>,
    pub upserts: Mutex<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<CalculationResult> {
        self.rows
            .lock()
            .iter()
            .find(|r| r.identity() == (start, end))
            .cloned()
    }
}

impl ResultSink for MemorySink {
    fn upsert(&self, result: &CalculationResult) -> Result<(), TradeWindowError> {
        *self.upserts.lock() += 1;
        let mut rows = self.rows.lock();
        match rows.iter_mut().find(|r| r.identity() == result.identity()) {
            Some(existing) => *existing = result.clone(),
            None => rows.push(result.clone()),
        }
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<CalculationResult>, TradeWindowError> {
        let mut rows = self.rows.lock().clone();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        rows.truncate(limit);
        Ok(rows)
    }

    fn count(&self) -> Result<usize, TradeWindowError> {
        Ok(self.rows.lock().len())
    }
}

pub fn memory_dispatcher() -> (Dispatcher, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let dispatcher = Dispatcher::new(Arc::new(TradeIndex::default()), sink.clone());
    (dispatcher, sink)
}

pub fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}

pub fn iso(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

pub fn trade_payload(trade_type: &str, volume: &str, time: DateTime<Utc>) -> String {
    format!(
        r#"{{"messageType":"trades","tradeType":"{trade_type}","volume":"{volume}","time":"{}"}}"#,
        iso(time)
    )
}

pub fn market_payload(buy: &str, sell: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        r#"{{"messageType":"market","buyPrice":"{buy}","sellPrice":"{sell}","startTime":"{}","endTime":"{}"}}"#,
        iso(start),
        iso(end)
    )
}

pub fn trade_msg(trade_type: &str, volume: &str, time: DateTime<Utc>) -> RawMessage {
    RawMessage::new(Topic::Trades, trade_payload(trade_type, volume, time))
}

pub fn market_msg(buy: &str, sell: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> RawMessage {
    RawMessage::new(Topic::MarketData, market_payload(buy, sell, start, end))
}
