//! Service configuration and its validation.
//!
//! Every value is read through [`ConfigPort`] and checked before the service
//! starts, so a bad file fails at startup rather than mid-stream.

use crate::domain::error::TradeWindowError;
use crate::domain::trade_index::{Granularity, DEFAULT_GRANULARITY_SECS};
use crate::ports::config_port::ConfigPort;
use chrono::TimeDelta;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RETENTION_HOURS: i64 = 24;
/// Ten years.
pub const MAX_RETENTION_HOURS: i64 = 87_600;
pub const DEFAULT_EVICTION_INTERVAL_SECS: i64 = 3600;
pub const DEFAULT_CHANNEL_CAPACITY: i64 = 1024;
pub const DEFAULT_POOL_SIZE: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Postgres,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Sqlite => f.write_str("sqlite"),
            StoreBackend::Postgres => f.write_str("postgres"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(format!("unknown backend {other:?} (expected sqlite or postgres)")),
        }
    }
}

/// Bounded retry around a failed store write. `attempts == 1` means a single
/// try with no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Linear backoff: the wait before retry `n` (1-based) is `n * backoff`.
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub granularity: Granularity,
    pub retention: TimeDelta,
    pub eviction_interval: Duration,
    pub backend: StoreBackend,
    pub retry: RetryPolicy,
    pub channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::hourly(),
            retention: TimeDelta::hours(DEFAULT_RETENTION_HOURS),
            eviction_interval: Duration::from_secs(DEFAULT_EVICTION_INTERVAL_SECS as u64),
            backend: StoreBackend::Sqlite,
            retry: RetryPolicy::none(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY as usize,
        }
    }
}

impl ServiceConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradeWindowError> {
        let granularity_secs =
            positive_int(config, "index", "granularity_secs", DEFAULT_GRANULARITY_SECS)?;
        let granularity = Granularity::from_secs(granularity_secs).ok_or_else(|| {
            TradeWindowError::invalid_config("index", "granularity_secs", "must be positive")
        })?;

        let retention_hours =
            positive_int(config, "index", "retention_hours", DEFAULT_RETENTION_HOURS)?;
        if retention_hours > MAX_RETENTION_HOURS {
            return Err(TradeWindowError::invalid_config(
                "index",
                "retention_hours",
                format!("must be at most {MAX_RETENTION_HOURS}"),
            ));
        }
        let retention = TimeDelta::hours(retention_hours);

        let eviction_secs = positive_int(
            config,
            "index",
            "eviction_interval_secs",
            DEFAULT_EVICTION_INTERVAL_SECS,
        )?;

        let backend = match config.get_string("store", "backend") {
            Some(raw) => raw.parse().map_err(|reason: String| {
                TradeWindowError::invalid_config("store", "backend", reason)
            })?,
            None => StoreBackend::Sqlite,
        };

        let attempts = positive_int(config, "store", "retry_attempts", 1)?;
        let backoff_ms = config.get_int("store", "retry_backoff_ms", 200);
        if backoff_ms < 0 {
            return Err(TradeWindowError::invalid_config(
                "store",
                "retry_backoff_ms",
                "must be non-negative",
            ));
        }

        let channel_capacity = positive_int(
            config,
            "ingest",
            "channel_capacity",
            DEFAULT_CHANNEL_CAPACITY,
        )?;

        Ok(Self {
            granularity,
            retention,
            eviction_interval: Duration::from_secs(eviction_secs as u64),
            backend,
            retry: RetryPolicy {
                attempts: u32::try_from(attempts).map_err(|_| {
                    TradeWindowError::invalid_config("store", "retry_attempts", "out of range")
                })?,
                backoff: Duration::from_millis(backoff_ms as u64),
            },
            channel_capacity: channel_capacity as usize,
        })
    }
}

fn positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, TradeWindowError> {
    if let Some(raw) = config.get_string(section, key) {
        if raw.trim().parse::<i64>().is_err() {
            return Err(TradeWindowError::invalid_config(
                section,
                key,
                format!("{raw:?} is not an integer"),
            ));
        }
    }
    let value = config.get_int(section, key, default);
    if value <= 0 {
        return Err(TradeWindowError::invalid_config(
            section,
            key,
            format!("{key} must be positive"),
        ));
    }
    Ok(value)
}
