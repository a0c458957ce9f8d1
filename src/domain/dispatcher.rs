//! Ingestion dispatcher.
//!
//! Routes each decoded message: trades are appended to the [`TradeIndex`]
//! (and counted by the [`PositionTracker`]); market windows are aggregated
//! over the index and written through the [`ResultSink`]. Failures are
//! isolated per message: `handle` logs and returns an [`Outcome`], it never
//! returns an error.

use crate::domain::aggregator;
use crate::domain::config::RetryPolicy;
use crate::domain::error::TradeWindowError;
use crate::domain::message::{decode, Inbound, RawMessage};
use crate::domain::position::PositionTracker;
use crate::domain::trade::TradeEvent;
use crate::domain::trade_index::TradeIndex;
use crate::domain::window::{CalculationResult, MarketWindow};
use crate::ports::result_sink::ResultSink;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    TradeStored,
    WindowStored(CalculationResult),
    Discarded,
    StorageFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub trades_stored: u64,
    pub windows_stored: u64,
    pub discarded: u64,
    pub storage_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    trades_stored: AtomicU64,
    windows_stored: AtomicU64,
    discarded: AtomicU64,
    storage_failures: AtomicU64,
}

pub struct Dispatcher {
    index: Arc<TradeIndex>,
    sink: Arc<dyn ResultSink + Send + Sync>,
    position: PositionTracker,
    retry: RetryPolicy,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(index: Arc<TradeIndex>, sink: Arc<dyn ResultSink + Send + Sync>) -> Self {
        Self {
            index,
            sink,
            position: PositionTracker::new(),
            retry: RetryPolicy::none(),
            counters: Counters::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn index(&self) -> &Arc<TradeIndex> {
        &self.index
    }

    pub fn position(&self) -> &PositionTracker {
        &self.position
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            trades_stored: self.counters.trades_stored.load(Ordering::Relaxed),
            windows_stored: self.counters.windows_stored.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            storage_failures: self.counters.storage_failures.load(Ordering::Relaxed),
        }
    }

    /// Process one message. Never fails; the outcome says what happened.
    pub fn handle(&self, message: &RawMessage) -> Outcome {
        let inbound = match decode(message.topic, &message.payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "discarding message"
                );
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                return Outcome::Discarded;
            }
        };

        match inbound {
            Inbound::Trade(event) => {
                self.store_trade(event);
                Outcome::TradeStored
            }
            Inbound::Market(window) => match self.settle_window(&window) {
                Ok(result) => Outcome::WindowStored(result),
                Err(e) => {
                    debug!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "window result lost"
                    );
                    Outcome::StorageFailed
                }
            },
        }
    }

    fn store_trade(&self, event: TradeEvent) {
        debug!(
            trade_type = %event.trade_type,
            volume = event.volume,
            time = %event.time,
            "stored trade"
        );
        self.position.record(&event);
        self.index.append(event);
        self.counters.trades_stored.fetch_add(1, Ordering::Relaxed);
    }

    /// Aggregate `window` over the index and upsert the result.
    pub fn settle_window(
        &self,
        window: &MarketWindow,
    ) -> Result<CalculationResult, TradeWindowError> {
        let trades = self.index.query(window.start_time, window.end_time);
        let result = aggregator::compute(window, &trades, Utc::now());

        match self.upsert_with_retry(&result) {
            Ok(()) => {
                info!(
                    start_time = %result.start_time,
                    end_time = %result.end_time,
                    trades = trades.len(),
                    buy_volume = result.buy_volume,
                    sell_volume = result.sell_volume,
                    profit_loss = result.profit_loss,
                    "stored window result"
                );
                self.counters.windows_stored.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(e) => {
                error!(
                    start_time = %result.start_time,
                    end_time = %result.end_time,
                    buy_price = result.buy_price,
                    sell_price = result.sell_price,
                    buy_volume = result.buy_volume,
                    sell_volume = result.sell_volume,
                    profit_loss = result.profit_loss,
                    error = %e,
                    "failed to store window result"
                );
                self.counters.storage_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn upsert_with_retry(&self, result: &CalculationResult) -> Result<(), TradeWindowError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.sink.upsert(result) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    let delay = self.retry.delay_before(attempt);
                    warn!(attempt, ?delay, error = %e, "upsert failed, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite_adapter::SqliteResultStore;
    use crate::domain::message::Topic;
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Fails the first `failures` upserts, then records.
    struct FlakySink {
        failures: Mutex<u32>,
        stored: Mutex<Vec<CalculationResult>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                stored: Mutex::new(Vec::new()),
            }
        }
    }

    impl ResultSink for FlakySink {
        fn upsert(&self, result: &CalculationResult) -> Result<(), TradeWindowError> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(TradeWindowError::Storage {
                    reason: "connection reset".into(),
                });
            }
            self.stored.lock().push(result.clone());
            Ok(())
        }

        fn list_recent(&self, limit: usize) -> Result<Vec<CalculationResult>, TradeWindowError> {
            Ok(self.stored.lock().iter().rev().take(limit).cloned().collect())
        }

        fn count(&self) -> Result<usize, TradeWindowError> {
            Ok(self.stored.lock().len())
        }
    }

    fn trade(trade_type: &str, volume: &str, time: &str) -> RawMessage {
        RawMessage::new(
            Topic::Trades,
            format!(
                r#"{{"messageType":"trades","tradeType":"{trade_type}","volume":"{volume}","time":"{time}"}}"#
            ),
        )
    }

    fn market(buy: &str, sell: &str, start: &str, end: &str) -> RawMessage {
        RawMessage::new(
            Topic::MarketData,
            format!(
                r#"{{"messageType":"market","buyPrice":"{buy}","sellPrice":"{sell}","startTime":"{start}","endTime":"{end}"}}"#
            ),
        )
    }

    fn sqlite_dispatcher() -> (Dispatcher, Arc<SqliteResultStore>) {
        let store = Arc::new(SqliteResultStore::in_memory().unwrap());
        store.initialize_schema().unwrap();
        let dispatcher = Dispatcher::new(Arc::new(TradeIndex::default()), store.clone());
        (dispatcher, store)
    }

    #[test]
    fn trades_then_window_produce_result() {
        let (dispatcher, store) = sqlite_dispatcher();
        assert_eq!(
            dispatcher.handle(&trade("BUY", "10", "2024-03-01T10:05:00Z")),
            Outcome::TradeStored
        );
        dispatcher.handle(&trade("SELL", "4", "2024-03-01T10:10:00Z"));

        let outcome = dispatcher.handle(&market(
            "100",
            "110",
            "2024-03-01T10:00:00Z",
            "2024-03-01T10:30:00Z",
        ));
        match outcome {
            Outcome::WindowStored(result) => assert_relative_eq!(result.profit_loss, -560.0),
            other => panic!("expected WindowStored, got {other:?}"),
        }
        assert_eq!(store.count().unwrap(), 1);
        assert_relative_eq!(dispatcher.position().open_position(), 6.0);
    }

    #[test]
    fn malformed_message_is_discarded_and_counted() {
        let (dispatcher, _) = sqlite_dispatcher();
        assert_eq!(
            dispatcher.handle(&trade("BUY", "abc", "2024-03-01T10:05:00Z")),
            Outcome::Discarded
        );
        assert_eq!(
            dispatcher.handle(&RawMessage::new(Topic::Trades, "{oops")),
            Outcome::Discarded
        );
        assert_eq!(dispatcher.stats().discarded, 2);
        assert!(dispatcher.index().is_empty());
    }

    #[test]
    fn storage_failure_is_isolated() {
        let sink = Arc::new(FlakySink::new(1));
        let dispatcher = Dispatcher::new(Arc::new(TradeIndex::default()), sink.clone());
        let window = market("1", "2", "2024-03-01T10:00:00Z", "2024-03-01T10:30:00Z");

        assert_eq!(dispatcher.handle(&window), Outcome::StorageFailed);
        assert!(matches!(dispatcher.handle(&window), Outcome::WindowStored(_)));

        let stats = dispatcher.stats();
        assert_eq!(stats.storage_failures, 1);
        assert_eq!(stats.windows_stored, 1);
    }

    #[test]
    fn retry_policy_recovers_transient_failures() {
        let sink = Arc::new(FlakySink::new(2));
        let dispatcher = Dispatcher::new(Arc::new(TradeIndex::default()), sink.clone())
            .with_retry(RetryPolicy {
                attempts: 3,
                backoff: Duration::from_millis(1),
            });
        let window = market("1", "2", "2024-03-01T10:00:00Z", "2024-03-01T10:30:00Z");

        assert!(matches!(dispatcher.handle(&window), Outcome::WindowStored(_)));
        assert_eq!(sink.count().unwrap(), 1);
        assert_eq!(dispatcher.stats().storage_failures, 0);
    }

    #[test]
    fn retries_exhausted_reports_failure() {
        let sink = Arc::new(FlakySink::new(5));
        let dispatcher = Dispatcher::new(Arc::new(TradeIndex::default()), sink.clone())
            .with_retry(RetryPolicy {
                attempts: 2,
                backoff: Duration::ZERO,
            });
        let window = market("1", "2", "2024-03-01T10:00:00Z", "2024-03-01T10:30:00Z");

        assert_eq!(dispatcher.handle(&window), Outcome::StorageFailed);
        assert_eq!(*sink.failures.lock(), 3);
    }

    /// Counts `ERROR` events seen while installed.
    struct ErrorCounter(Arc<AtomicU64>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn storage_failure_logs_one_error() {
        use tracing_subscriber::layer::SubscriberExt;

        let errors = Arc::new(AtomicU64::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));
        let sink = Arc::new(FlakySink::new(1));
        let dispatcher = Dispatcher::new(Arc::new(TradeIndex::default()), sink);
        let window = market("1", "2", "2024-03-01T10:00:00Z", "2024-03-01T10:30:00Z");

        let outcome = tracing::subscriber::with_default(subscriber, || dispatcher.handle(&window));

        assert_eq!(outcome, Outcome::StorageFailed);
        assert_eq!(errors.load(Ordering::Relaxed), 1);
    }
}
