//! SQLite result store.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text (microsecond
//! precision), so text order is chronological order.

use crate::domain::error::TradeWindowError;
use crate::domain::window::CalculationResult;
use crate::ports::config_port::ConfigPort;
use crate::ports::result_sink::ResultSink;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

pub struct SqliteResultStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteResultStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradeWindowError> {
        let db_path = config.require_string("sqlite", "path")?;
        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool =
            Pool::builder()
                .max_size(pool_size)
                .build(manager)
                .map_err(|e: r2d2::Error| TradeWindowError::Storage {
                    reason: e.to_string(),
                })?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, TradeWindowError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| TradeWindowError::Storage {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, TradeWindowError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| TradeWindowError::Storage {
                reason: e.to_string(),
            })
    }

    pub fn initialize_schema(&self) -> Result<(), TradeWindowError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS calculation_results (
                    start_time TEXT NOT NULL,
                    end_time TEXT NOT NULL,
                    buy_price REAL NOT NULL,
                    sell_price REAL NOT NULL,
                    buy_volume REAL NOT NULL,
                    sell_volume REAL NOT NULL,
                    profit_loss REAL NOT NULL,
                    calculated_at TEXT NOT NULL,
                    UNIQUE (start_time, end_time)
                );
                CREATE INDEX IF NOT EXISTS idx_calculation_results_start
                    ON calculation_results(start_time DESC);",
            )
            .map_err(|e: rusqlite::Error| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, text: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

impl ResultSink for SqliteResultStore {
    fn upsert(&self, result: &CalculationResult) -> Result<(), TradeWindowError> {
        self.conn()?
            .execute(
                "INSERT INTO calculation_results (
                    start_time, end_time, buy_price, sell_price,
                    buy_volume, sell_volume, profit_loss, calculated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (start_time, end_time) DO UPDATE SET
                    buy_price = excluded.buy_price,
                    sell_price = excluded.sell_price,
                    buy_volume = excluded.buy_volume,
                    sell_volume = excluded.sell_volume,
                    profit_loss = excluded.profit_loss,
                    calculated_at = excluded.calculated_at",
                params![
                    format_ts(result.start_time),
                    format_ts(result.end_time),
                    result.buy_price,
                    result.sell_price,
                    result.buy_volume,
                    result.sell_volume,
                    result.profit_loss,
                    format_ts(result.calculated_at),
                ],
            )
            .map_err(|e: rusqlite::Error| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<CalculationResult>, TradeWindowError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT start_time, end_time, buy_price, sell_price,
                        buy_volume, sell_volume, profit_loss, calculated_at
                 FROM calculation_results
                 ORDER BY start_time DESC, end_time DESC
                 LIMIT ?1",
            )
            .map_err(|e: rusqlite::Error| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(CalculationResult {
                    start_time: parse_ts(0, row.get(0)?)?,
                    end_time: parse_ts(1, row.get(1)?)?,
                    buy_price: row.get(2)?,
                    sell_price: row.get(3)?,
                    buy_volume: row.get(4)?,
                    sell_volume: row.get(5)?,
                    profit_loss: row.get(6)?,
                    calculated_at: parse_ts(7, row.get(7)?)?,
                })
            })
            .map_err(|e: rusqlite::Error| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e: rusqlite::Error| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })
    }

    fn count(&self) -> Result<usize, TradeWindowError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM calculation_results", [], |row| {
                row.get(0)
            })
            .map_err(|e: rusqlite::Error| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })?;
        Ok(count as usize)
    }
}
