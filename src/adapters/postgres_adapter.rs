//! PostgreSQL store adapter.
//!
//! Same logical schema as the SQLite adapter; dates are native `DATE` columns.

use crate::adapters::row_codec::{IndicatorRow, decode_value, encode_value};
use crate::domain::error::EngineError;
use crate::domain::indicator::{
    CacheKey, CacheTier, Indicator, IndicatorId, StockId, TierScope, ValueMap,
};
use crate::domain::price::PriceRow;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{IndicatorRepository, PriceRepository, ValueRepository};
use chrono::NaiveDate;
use postgres::NoTls;
use postgres::types::ToSql;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

type Manager = PostgresConnectionManager<NoTls>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS stocks (
        id BIGINT PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS prices (
        stock_id BIGINT NOT NULL REFERENCES stocks(id),
        date DATE NOT NULL,
        open DOUBLE PRECISION NOT NULL,
        high DOUBLE PRECISION NOT NULL,
        low DOUBLE PRECISION NOT NULL,
        close DOUBLE PRECISION NOT NULL,
        volume BIGINT NOT NULL,
        turnover DOUBLE PRECISION,
        amplitude DOUBLE PRECISION,
        change_pct DOUBLE PRECISION,
        change_amount DOUBLE PRECISION,
        turnover_rate DOUBLE PRECISION,
        PRIMARY KEY (stock_id, date)
    );
    CREATE TABLE IF NOT EXISTS indicators (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        code TEXT NOT NULL,
        visibility TEXT NOT NULL,
        owner_id BIGINT NOT NULL,
        dependencies TEXT NOT NULL DEFAULT '[]',
        dependency_columns TEXT NOT NULL DEFAULT '[]',
        output_column TEXT,
        is_group BOOLEAN NOT NULL DEFAULT FALSE,
        group_name TEXT,
        expected_outputs TEXT NOT NULL DEFAULT '[]',
        external_datasets TEXT NOT NULL DEFAULT '{}'
    );
    CREATE TABLE IF NOT EXISTS indicator_values (
        indicator_id BIGINT NOT NULL,
        stock_id BIGINT NOT NULL,
        date DATE NOT NULL,
        value DOUBLE PRECISION,
        group_values TEXT,
        PRIMARY KEY (indicator_id, stock_id, date)
    );
    CREATE TABLE IF NOT EXISTS indicator_value_cache (
        user_id BIGINT NOT NULL,
        indicator_id BIGINT NOT NULL,
        stock_id BIGINT NOT NULL,
        date DATE NOT NULL,
        value DOUBLE PRECISION,
        group_values TEXT,
        PRIMARY KEY (user_id, indicator_id, stock_id, date)
    );";

fn query_err(e: postgres::Error) -> EngineError {
    EngineError::DatabaseQuery {
        reason: e.to_string(),
    }
}

pub struct PostgresStore {
    pool: Pool<Manager>,
}

impl PostgresStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EngineError> {
        // [postgres] connection_string, else [database] conninfo
        let connection_string = config
            .get_string("postgres", "connection_string")
            .or_else(|| config.get_string("database", "conninfo"))
            .ok_or_else(|| EngineError::ConfigMissing {
                section: "postgres".into(),
                key: "connection_string".into(),
            })?;

        let pg_config = connection_string
            .parse::<postgres::Config>()
            .map_err(|e| EngineError::ConfigInvalid {
                section: "postgres".into(),
                key: "connection_string".into(),
                reason: e.to_string(),
            })?;
        let pool_size = u32::try_from(config.get_int("postgres", "pool_size", 4))
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| EngineError::ConfigInvalid {
                section: "postgres".into(),
                key: "pool_size".into(),
                reason: "must be a positive integer".into(),
            })?;

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| EngineError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<Manager>, EngineError> {
        self.pool.get().map_err(|e: r2d2::Error| EngineError::Database {
            reason: e.to_string(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), EngineError> {
        self.conn()?.batch_execute(SCHEMA).map_err(query_err)
    }
}

impl IndicatorRepository for PostgresStore {
    fn find_indicator(&self, id: IndicatorId) -> Result<Option<Indicator>, EngineError> {
        let row = self
            .conn()?
            .query_opt(
                "SELECT id, name, code, visibility, owner_id, dependencies, dependency_columns, \
                        output_column, is_group, group_name, expected_outputs, external_datasets \
                 FROM indicators WHERE id = $1",
                &[&id],
            )
            .map_err(query_err)?;

        row.map(|row| {
            IndicatorRow {
                id: row.get(0),
                name: row.get(1),
                code: row.get(2),
                visibility: row.get(3),
                owner_id: row.get(4),
                dependencies: row.get(5),
                dependency_columns: row.get(6),
                output_column: row.get(7),
                is_group: row.get(8),
                group_name: row.get(9),
                expected_outputs: row.get(10),
                external_datasets: row.get(11),
            }
            .into_indicator()
        })
        .transpose()
    }
}

impl PriceRepository for PostgresStore {
    fn stock_exists(&self, stock_id: StockId) -> Result<bool, EngineError> {
        let row = self
            .conn()?
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM stocks WHERE id = $1)",
                &[&stock_id],
            )
            .map_err(query_err)?;
        Ok(row.get(0))
    }

    fn fetch_prices(
        &self,
        stock_id: StockId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<PriceRow>, EngineError> {
        let query = "SELECT date, open, high, low, close, volume, \
                            turnover, amplitude, change_pct, change_amount, turnover_rate \
                     FROM prices \
                     WHERE stock_id = $1 \
                       AND ($2::date IS NULL OR date >= $2) \
                       AND ($3::date IS NULL OR date <= $3) \
                     ORDER BY date ASC";

        let params: &[&(dyn ToSql + Sync)] = &[&stock_id, &start_date, &end_date];
        let rows = self.conn()?.query(query, params).map_err(query_err)?;

        Ok(rows
            .into_iter()
            .map(|row| PriceRow {
                date: row.get(0),
                open: row.get(1),
                high: row.get(2),
                low: row.get(3),
                close: row.get(4),
                volume: row.get(5),
                turnover: row.get(6),
                amplitude: row.get(7),
                change_pct: row.get(8),
                change_amount: row.get(9),
                turnover_rate: row.get(10),
            })
            .collect())
    }
}

impl ValueRepository for PostgresStore {
    fn read_values(&self, key: &CacheKey) -> Result<ValueMap, EngineError> {
        let mut conn = self.conn()?;
        let rows = match key.tier {
            CacheTier::Shared => conn.query(
                "SELECT date, value, group_values FROM indicator_values \
                 WHERE indicator_id = $1 AND stock_id = $2 ORDER BY date ASC",
                &[&key.indicator_id, &key.stock_id],
            ),
            CacheTier::Private(user) => conn.query(
                "SELECT date, value, group_values FROM indicator_value_cache \
                 WHERE user_id = $1 AND indicator_id = $2 AND stock_id = $3 ORDER BY date ASC",
                &[&user, &key.indicator_id, &key.stock_id],
            ),
        }
        .map_err(query_err)?;

        let mut values = ValueMap::new();
        for row in rows {
            let date: NaiveDate = row.get(0);
            values.insert(date, decode_value(row.get(1), row.get(2))?);
        }
        Ok(values)
    }

    fn replace_values(&self, key: &CacheKey, values: &ValueMap) -> Result<usize, EngineError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;

        match key.tier {
            CacheTier::Shared => {
                tx.execute(
                    "DELETE FROM indicator_values WHERE indicator_id = $1 AND stock_id = $2",
                    &[&key.indicator_id, &key.stock_id],
                )
                .map_err(query_err)?;
                let stmt = tx
                    .prepare(
                        "INSERT INTO indicator_values (indicator_id, stock_id, date, value, group_values) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .map_err(query_err)?;
                for (date, value) in values {
                    let (scalar, group) = encode_value(value)?;
                    tx.execute(
                        &stmt,
                        &[&key.indicator_id, &key.stock_id, date, &scalar, &group],
                    )
                    .map_err(query_err)?;
                }
            }
            CacheTier::Private(user) => {
                tx.execute(
                    "DELETE FROM indicator_value_cache \
                     WHERE user_id = $1 AND indicator_id = $2 AND stock_id = $3",
                    &[&user, &key.indicator_id, &key.stock_id],
                )
                .map_err(query_err)?;
                let stmt = tx
                    .prepare(
                        "INSERT INTO indicator_value_cache \
                             (user_id, indicator_id, stock_id, date, value, group_values) \
                         VALUES ($1, $2, $3, $4, $5, $6)",
                    )
                    .map_err(query_err)?;
                for (date, value) in values {
                    let (scalar, group) = encode_value(value)?;
                    tx.execute(
                        &stmt,
                        &[&user, &key.indicator_id, &key.stock_id, date, &scalar, &group],
                    )
                    .map_err(query_err)?;
                }
            }
        }

        tx.commit().map_err(query_err)?;
        Ok(values.len())
    }

    fn delete_values(
        &self,
        indicator_id: IndicatorId,
        stock_id: Option<StockId>,
        scope: TierScope,
    ) -> Result<usize, EngineError> {
        let mut conn = self.conn()?;
        let deleted = match scope {
            TierScope::Shared => conn.execute(
                "DELETE FROM indicator_values \
                 WHERE indicator_id = $1 AND ($2::bigint IS NULL OR stock_id = $2)",
                &[&indicator_id, &stock_id],
            ),
            TierScope::Private(user_id) => conn.execute(
                "DELETE FROM indicator_value_cache \
                 WHERE indicator_id = $1 AND ($2::bigint IS NULL OR stock_id = $2) \
                   AND ($3::bigint IS NULL OR user_id = $3)",
                &[&indicator_id, &stock_id, &user_id],
            ),
        }
        .map_err(query_err)?;
        Ok(deleted as usize)
    }
}
