//! Time-bucketed in-memory trade index.
//!
//! Trades are grouped into buckets keyed by their timestamp truncated to a
//! fixed granularity (one hour by default). Range queries select the buckets
//! whose key falls in `[key(start), key(end)]` and then filter each selected
//! bucket event by event. Bucket keys are ordinals of the truncated time, so
//! key order is chronological order.
//!
//! The bucket map sits behind a single `RwLock`: `query` takes the read side,
//! `append` and `evict` take the write side, so no reader ever observes a
//! bucket mid-append or mid-eviction.

use crate::domain::trade::TradeEvent;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

pub const DEFAULT_GRANULARITY_SECS: i64 = 3600;

/// Bucket width. Must not exceed the narrowest expected window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Granularity {
    secs: i64,
}

impl Granularity {
    /// `None` unless `secs` is positive.
    pub fn from_secs(secs: i64) -> Option<Self> {
        (secs > 0).then_some(Self { secs })
    }

    pub fn hourly() -> Self {
        Self {
            secs: DEFAULT_GRANULARITY_SECS,
        }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Floor of `time` to this granularity, as an ordinal.
    pub fn bucket_key(&self, time: DateTime<Utc>) -> BucketKey {
        BucketKey(time.timestamp().div_euclid(self.secs))
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self::hourly()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey(pub i64);

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionSummary {
    pub evicted_events: usize,
    pub dropped_buckets: usize,
    pub remaining_buckets: usize,
}

pub struct TradeIndex {
    granularity: Granularity,
    buckets: RwLock<BTreeMap<BucketKey, Vec<TradeEvent>>>,
}

impl TradeIndex {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            buckets: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert into the event's bucket, creating it on first use. Arrival
    /// order within a bucket is preserved.
    pub fn append(&self, event: TradeEvent) {
        let key = self.granularity.bucket_key(event.time);
        self.buckets.write().entry(key).or_default().push(event);
    }

    /// Every stored event with `start <= time <= end`.
    ///
    /// Buckets are visited in key order; within a bucket events come back in
    /// arrival order.
    pub fn query(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<TradeEvent> {
        if start > end {
            return Vec::new();
        }
        let start_key = self.granularity.bucket_key(start);
        let end_key = self.granularity.bucket_key(end);

        let buckets = self.buckets.read();
        buckets
            .range(start_key..=end_key)
            .flat_map(|(_, events)| events.iter())
            .filter(|e| start <= e.time && e.time <= end)
            .cloned()
            .collect()
    }

    /// Drop every event older than `now - retention` and any bucket left empty.
    /// A horizon before the earliest representable time evicts nothing.
    pub fn evict(&self, retention: TimeDelta, now: DateTime<Utc>) -> EvictionSummary {
        let mut summary = EvictionSummary::default();
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            summary.remaining_buckets = self.bucket_count();
            return summary;
        };

        let mut buckets = self.buckets.write();
        buckets.retain(|_, events| {
            let before = events.len();
            events.retain(|e| e.time >= cutoff);
            summary.evicted_events += before - events.len();
            if events.is_empty() {
                summary.dropped_buckets += 1;
                false
            } else {
                true
            }
        });
        summary.remaining_buckets = buckets.len();
        summary
    }

    pub fn len(&self) -> usize {
        self.buckets.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }
}

impl Default for TradeIndex {
    fn default() -> Self {
        Self::new(Granularity::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::TradeType;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn buy(volume: f64, time: DateTime<Utc>) -> TradeEvent {
        TradeEvent::new(TradeType::Buy, volume, time)
    }

    #[test]
    fn granularity_must_be_positive() {
        assert!(Granularity::from_secs(0).is_none());
        assert!(Granularity::from_secs(-60).is_none());
        assert_eq!(Granularity::from_secs(60).unwrap().secs(), 60);
    }

    #[test]
    fn bucket_key_truncates_to_hour() {
        let g = Granularity::hourly();
        assert_eq!(g.bucket_key(ts(13, 0, 0)), g.bucket_key(ts(13, 59, 59)));
        assert!(g.bucket_key(ts(13, 59, 59)) < g.bucket_key(ts(14, 0, 0)));
        assert_eq!(g.bucket_key(ts(13, 42, 7)), g.bucket_key(ts(13, 0, 0)));
    }

    #[test]
    fn bucket_key_floors_before_epoch() {
        let g = Granularity::hourly();
        let before = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 0).unwrap();
        assert_eq!(g.bucket_key(before), BucketKey(-1));
    }

    #[test]
    fn append_creates_buckets_lazily() {
        let index = TradeIndex::default();
        assert!(index.is_empty());
        index.append(buy(1.0, ts(13, 10, 0)));
        index.append(buy(2.0, ts(13, 20, 0)));
        index.append(buy(3.0, ts(15, 0, 0)));
        assert_eq!(index.bucket_count(), 2);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn query_within_single_bucket_keeps_arrival_order() {
        let index = TradeIndex::default();
        index.append(buy(1.0, ts(13, 30, 0)));
        index.append(buy(2.0, ts(13, 10, 0)));
        index.append(buy(3.0, ts(13, 50, 0)));

        let found = index.query(ts(13, 0, 0), ts(13, 40, 0));
        let volumes: Vec<f64> = found.iter().map(|e| e.volume).collect();
        assert_eq!(volumes, vec![1.0, 2.0]);
    }

    #[test]
    fn query_spans_bucket_boundary() {
        let index = TradeIndex::default();
        index.append(buy(1.0, ts(13, 57, 0)));
        index.append(buy(2.0, ts(13, 59, 0)));
        index.append(buy(3.0, ts(14, 1, 0)));
        index.append(buy(4.0, ts(14, 3, 0)));

        let found = index.query(ts(13, 58, 0), ts(14, 2, 0));
        let volumes: Vec<f64> = found.iter().map(|e| e.volume).collect();
        assert_eq!(volumes, vec![2.0, 3.0]);
    }

    #[test]
    fn query_bounds_are_inclusive() {
        let index = TradeIndex::default();
        index.append(buy(1.0, ts(10, 0, 0)));
        index.append(buy(2.0, ts(10, 30, 0)));

        let found = index.query(ts(10, 0, 0), ts(10, 30, 0));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn inverted_range_is_empty() {
        let index = TradeIndex::default();
        index.append(buy(1.0, ts(10, 15, 0)));
        assert!(index.query(ts(11, 0, 0), ts(10, 0, 0)).is_empty());
    }

    #[test]
    fn evict_drops_old_events_and_empty_buckets() {
        let index = TradeIndex::default();
        index.append(buy(1.0, ts(1, 0, 0)));
        index.append(buy(2.0, ts(2, 10, 0)));
        index.append(buy(3.0, ts(2, 50, 0)));
        index.append(buy(4.0, ts(5, 0, 0)));

        // cutoff 02:30
        let summary = index.evict(TimeDelta::hours(3), ts(5, 30, 0));
        assert_eq!(summary.evicted_events, 2);
        assert_eq!(summary.dropped_buckets, 1);
        assert_eq!(summary.remaining_buckets, 2);

        let remaining: Vec<f64> = index
            .query(ts(0, 0, 0), ts(23, 0, 0))
            .iter()
            .map(|e| e.volume)
            .collect();
        assert_eq!(remaining, vec![3.0, 4.0]);
    }

    #[test]
    fn evict_keeps_event_exactly_at_cutoff() {
        let index = TradeIndex::default();
        index.append(buy(1.0, ts(2, 0, 0)));
        let summary = index.evict(TimeDelta::hours(1), ts(3, 0, 0));
        assert_eq!(summary.evicted_events, 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn evict_with_unrepresentable_horizon_keeps_everything() {
        let index = TradeIndex::default();
        index.append(buy(1.0, ts(2, 0, 0)));
        let summary = index.evict(TimeDelta::MAX, ts(3, 0, 0));
        assert_eq!(summary.evicted_events, 0);
        assert_eq!(summary.remaining_buckets, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn concurrent_append_and_evict() {
        let index = Arc::new(TradeIndex::default());
        let writer = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    index.append(buy(1.0, ts(12, i % 60, 0)));
                }
            })
        };
        let evictor = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    index.evict(TimeDelta::hours(24), ts(13, 0, 0));
                }
            })
        };
        writer.join().unwrap();
        evictor.join().unwrap();
        assert_eq!(index.len(), 500);
        assert_eq!(index.query(ts(12, 0, 0), ts(12, 59, 59)).len(), 500);
    }

    fn base() -> DateTime<Utc> {
        ts(0, 0, 0)
    }

    proptest! {
        #[test]
        fn query_matches_linear_scan(
            offsets in prop::collection::vec(0i64..86_400, 0..200),
            a in 0i64..86_400,
            b in 0i64..86_400,
            granularity in prop::sample::select(vec![60i64, 900, 3600, 7200]),
        ) {
            let index = TradeIndex::new(Granularity::from_secs(granularity).unwrap());
            let events: Vec<TradeEvent> = offsets
                .iter()
                .enumerate()
                .map(|(i, off)| buy(i as f64, base() + TimeDelta::seconds(*off)))
                .collect();
            for e in &events {
                index.append(e.clone());
            }

            let (lo, hi) = (a.min(b), a.max(b));
            let start = base() + TimeDelta::seconds(lo);
            let end = base() + TimeDelta::seconds(hi);

            let mut got: Vec<f64> = index.query(start, end).iter().map(|e| e.volume).collect();
            let mut want: Vec<f64> = events
                .iter()
                .filter(|e| start <= e.time && e.time <= end)
                .map(|e| e.volume)
                .collect();
            got.sort_by(f64::total_cmp);
            want.sort_by(f64::total_cmp);
            prop_assert_eq!(got, want);
        }

        #[test]
        fn eviction_respects_horizon(
            offsets in prop::collection::vec(0i64..86_400, 0..200),
            horizon_secs in 1i64..86_400,
        ) {
            let index = TradeIndex::default();
            for (i, off) in offsets.iter().enumerate() {
                index.append(buy(i as f64, base() + TimeDelta::seconds(*off)));
            }
            let now = base() + TimeDelta::seconds(86_400);
            let cutoff = now - TimeDelta::seconds(horizon_secs);
            index.evict(TimeDelta::seconds(horizon_secs), now);

            let all = index.query(base(), now);
            prop_assert!(all.iter().all(|e| e.time >= cutoff));
            let expected = offsets
                .iter()
                .filter(|off| base() + TimeDelta::seconds(**off) >= cutoff)
                .count();
            prop_assert_eq!(all.len(), expected);
        }
    }
}
