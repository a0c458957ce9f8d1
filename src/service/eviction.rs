//! Periodic trade-index eviction.

use crate::domain::trade_index::{EvictionSummary, TradeIndex};
use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionState {
    Idle,
    Running,
}

pub struct EvictionScheduler {
    index: Arc<TradeIndex>,
    retention: TimeDelta,
    period: Duration,
    state: Mutex<EvictionState>,
}

impl EvictionScheduler {
    pub fn new(index: Arc<TradeIndex>, retention: TimeDelta, period: Duration) -> Self {
        Self {
            index,
            retention,
            period,
            state: Mutex::new(EvictionState::Idle),
        }
    }

    pub fn state(&self) -> EvictionState {
        *self.state.lock()
    }

    /// One pass: Idle -> Running -> Idle.
    pub fn run_once(&self) -> EvictionSummary {
        *self.state.lock() = EvictionState::Running;
        let summary = self.index.evict(self.retention, Utc::now());
        *self.state.lock() = EvictionState::Idle;

        info!(
            evicted = summary.evicted_events,
            dropped_buckets = summary.dropped_buckets,
            active_buckets = summary.remaining_buckets,
            "eviction completed"
        );
        summary
    }

    /// Tick every `period` until `shutdown` flips to true or its sender is
    /// dropped. The first pass runs one period after start. Returns the
    /// number of passes made.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut timer = interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut passes = 0;

        info!(
            period = ?self.period,
            retention_hours = self.retention.num_hours(),
            "eviction timer started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    self.run_once();
                    passes += 1;
                }
            }
        }
        debug!(passes, "eviction timer stopped");
        passes
    }
}
