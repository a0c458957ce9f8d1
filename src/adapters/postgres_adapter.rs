//! PostgreSQL result store.

use crate::domain::error::TradeWindowError;
use crate::domain::window::CalculationResult;
use crate::ports::config_port::ConfigPort;
use crate::ports::result_sink::ResultSink;
use chrono::{DateTime, Utc};
use postgres::NoTls;
use postgres::types::ToSql;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

pub struct PostgresResultStore {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

impl PostgresResultStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradeWindowError> {
        let connection_string = config.require_string("postgres", "connection_string")?;
        let pool_size = config.get_int("postgres", "pool_size", 4).max(1) as u32;

        let pg_config = connection_string
            .parse::<postgres::Config>()
            .map_err(|e| TradeWindowError::ConfigInvalid {
                section: "postgres".into(),
                key: "connection_string".into(),
                reason: e.to_string(),
            })?;

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| TradeWindowError::Storage {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(
        &self,
    ) -> Result<PooledConnection<PostgresConnectionManager<NoTls>>, TradeWindowError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| TradeWindowError::Storage {
                reason: e.to_string(),
            })
    }

    pub fn initialize_schema(&self) -> Result<(), TradeWindowError> {
        self.conn()?
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS public.calculation_results (
                    start_time timestamptz NOT NULL,
                    end_time timestamptz NOT NULL,
                    buy_price double precision NOT NULL,
                    sell_price double precision NOT NULL,
                    buy_volume double precision NOT NULL,
                    sell_volume double precision NOT NULL,
                    profit_loss double precision NOT NULL,
                    calculated_at timestamptz NOT NULL,
                    CONSTRAINT calculation_results_window UNIQUE (start_time, end_time)
                );
                CREATE INDEX IF NOT EXISTS idx_calculation_results_start
                    ON public.calculation_results (start_time DESC);",
            )
            .map_err(|e| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })
    }
}

impl ResultSink for PostgresResultStore {
    fn upsert(&self, result: &CalculationResult) -> Result<(), TradeWindowError> {
        let query = "INSERT INTO public.calculation_results (
                        start_time, end_time, buy_price, sell_price,
                        buy_volume, sell_volume, profit_loss, calculated_at
                     ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (start_time, end_time) DO UPDATE SET
                        buy_price = EXCLUDED.buy_price,
                        sell_price = EXCLUDED.sell_price,
                        buy_volume = EXCLUDED.buy_volume,
                        sell_volume = EXCLUDED.sell_volume,
                        profit_loss = EXCLUDED.profit_loss,
                        calculated_at = EXCLUDED.calculated_at";

        let params: &[&(dyn ToSql + Sync)] = &[
            &result.start_time,
            &result.end_time,
            &result.buy_price,
            &result.sell_price,
            &result.buy_volume,
            &result.sell_volume,
            &result.profit_loss,
            &result.calculated_at,
        ];
        self.conn()?
            .execute(query, params)
            .map_err(|e| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<CalculationResult>, TradeWindowError> {
        let query = "SELECT start_time, end_time, buy_price, sell_price,
                            buy_volume, sell_volume, profit_loss, calculated_at
                     FROM public.calculation_results
                     ORDER BY start_time DESC, end_time DESC
                     LIMIT $1";
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = self
            .conn()?
            .query(query, &[&limit])
            .map_err(|e| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let start_time: DateTime<Utc> = row.get(0);
                let end_time: DateTime<Utc> = row.get(1);
                let calculated_at: DateTime<Utc> = row.get(7);
                CalculationResult {
                    start_time,
                    end_time,
                    buy_price: row.get(2),
                    sell_price: row.get(3),
                    buy_volume: row.get(4),
                    sell_volume: row.get(5),
                    profit_loss: row.get(6),
                    calculated_at,
                }
            })
            .collect())
    }

    fn count(&self) -> Result<usize, TradeWindowError> {
        let row = self
            .conn()?
            .query_one("SELECT COUNT(*) FROM public.calculation_results", &[])
            .map_err(|e| TradeWindowError::StorageQuery {
                reason: e.to_string(),
            })?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }
}
