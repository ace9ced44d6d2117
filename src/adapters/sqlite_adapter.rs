//! SQLite store adapter.
//!
//! Shared-tier values live in `indicator_values`, private-tier values in
//! `indicator_value_cache`. List-valued indicator columns are JSON text.

use crate::adapters::row_codec::{IndicatorRow, decode_value, encode_value};
use crate::domain::error::EngineError;
use crate::domain::indicator::{
    CacheKey, CacheTier, Indicator, IndicatorId, StockId, TierScope, ValueMap,
};
use crate::domain::price::PriceRow;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{IndicatorRepository, PriceRepository, ValueRepository};
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, Row, params};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS stocks (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS prices (
        stock_id INTEGER NOT NULL REFERENCES stocks(id),
        date TEXT NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume INTEGER NOT NULL,
        turnover REAL,
        amplitude REAL,
        change_pct REAL,
        change_amount REAL,
        turnover_rate REAL,
        PRIMARY KEY (stock_id, date)
    );
    CREATE TABLE IF NOT EXISTS indicators (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        code TEXT NOT NULL,
        visibility TEXT NOT NULL,
        owner_id INTEGER NOT NULL,
        dependencies TEXT NOT NULL DEFAULT '[]',
        dependency_columns TEXT NOT NULL DEFAULT '[]',
        output_column TEXT,
        is_group INTEGER NOT NULL DEFAULT 0,
        group_name TEXT,
        expected_outputs TEXT NOT NULL DEFAULT '[]',
        external_datasets TEXT NOT NULL DEFAULT '{}'
    );
    CREATE TABLE IF NOT EXISTS indicator_values (
        indicator_id INTEGER NOT NULL,
        stock_id INTEGER NOT NULL,
        date TEXT NOT NULL,
        value REAL,
        group_values TEXT,
        PRIMARY KEY (indicator_id, stock_id, date)
    );
    CREATE TABLE IF NOT EXISTS indicator_value_cache (
        user_id INTEGER NOT NULL,
        indicator_id INTEGER NOT NULL,
        stock_id INTEGER NOT NULL,
        date TEXT NOT NULL,
        value REAL,
        group_values TEXT,
        PRIMARY KEY (user_id, indicator_id, stock_id, date)
    );
    CREATE INDEX IF NOT EXISTS idx_values_indicator ON indicator_values(indicator_id);
    CREATE INDEX IF NOT EXISTS idx_value_cache_indicator ON indicator_value_cache(indicator_id);";

fn query_err(e: rusqlite::Error) -> EngineError {
    EngineError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, rusqlite::Error> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            s.len(),
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn value_row(row: &Row<'_>) -> Result<(NaiveDate, Option<f64>, Option<String>), rusqlite::Error> {
    let date_str: String = row.get(0)?;
    Ok((parse_date(&date_str)?, row.get(1)?, row.get(2)?))
}

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EngineError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| EngineError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = u32::try_from(config.get_int("sqlite", "pool_size", 4))
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| EngineError::ConfigInvalid {
                section: "sqlite".into(),
                key: "pool_size".into(),
                reason: "must be a positive integer".into(),
            })?;

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        });
        let pool =
            Pool::builder()
                .max_size(pool_size)
                .build(manager)
                .map_err(|e: r2d2::Error| EngineError::Database {
                    reason: e.to_string(),
                })?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, EngineError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| EngineError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, EngineError> {
        self.pool.get().map_err(|e: r2d2::Error| EngineError::Database {
            reason: e.to_string(),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), EngineError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    pub fn insert_stock(&self, id: StockId, code: &str, name: &str) -> Result<(), EngineError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO stocks (id, code, name) VALUES (?1, ?2, ?3)",
                params![id, code, name],
            )
            .map_err(query_err)?;
        Ok(())
    }

    pub fn insert_prices(&self, stock_id: StockId, rows: &[PriceRow]) -> Result<(), EngineError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO prices (stock_id, date, open, high, low, close, volume,
                     turnover, amplitude, change_pct, change_amount, turnover_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    stock_id,
                    row.date.format(DATE_FORMAT).to_string(),
                    row.open,
                    row.high,
                    row.low,
                    row.close,
                    row.volume,
                    row.turnover,
                    row.amplitude,
                    row.change_pct,
                    row.change_amount,
                    row.turnover_rate
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)
    }

    pub fn delete_prices(&self, stock_id: StockId) -> Result<usize, EngineError> {
        self.conn()?
            .execute("DELETE FROM prices WHERE stock_id = ?1", params![stock_id])
            .map_err(query_err)
    }

    pub fn insert_indicator(&self, indicator: &Indicator) -> Result<(), EngineError> {
        let row = IndicatorRow::from_indicator(indicator)?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO indicators (id, name, code, visibility, owner_id,
                     dependencies, dependency_columns, output_column, is_group, group_name,
                     expected_outputs, external_datasets)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    row.id,
                    row.name,
                    row.code,
                    row.visibility,
                    row.owner_id,
                    row.dependencies,
                    row.dependency_columns,
                    row.output_column,
                    row.is_group,
                    row.group_name,
                    row.expected_outputs,
                    row.external_datasets
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }
}

impl IndicatorRepository for SqliteStore {
    fn find_indicator(&self, id: IndicatorId) -> Result<Option<Indicator>, EngineError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, code, visibility, owner_id, dependencies, dependency_columns,
                        output_column, is_group, group_name, expected_outputs, external_datasets
                 FROM indicators WHERE id = ?1",
                params![id],
                |row| {
                    Ok(IndicatorRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                        visibility: row.get(3)?,
                        owner_id: row.get(4)?,
                        dependencies: row.get(5)?,
                        dependency_columns: row.get(6)?,
                        output_column: row.get(7)?,
                        is_group: row.get(8)?,
                        group_name: row.get(9)?,
                        expected_outputs: row.get(10)?,
                        external_datasets: row.get(11)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)?;

        row.map(IndicatorRow::into_indicator).transpose()
    }
}

impl PriceRepository for SqliteStore {
    fn stock_exists(&self, stock_id: StockId) -> Result<bool, EngineError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM stocks WHERE id = ?1)",
            params![stock_id],
            |row| row.get(0),
        )
        .map_err(query_err)
    }

    fn fetch_prices(
        &self,
        stock_id: StockId,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<PriceRow>, EngineError> {
        let conn = self.conn()?;

        let start_str = start_date.map(|d| d.format(DATE_FORMAT).to_string());
        let end_str = end_date.map(|d| d.format(DATE_FORMAT).to_string());

        let query = "SELECT date, open, high, low, close, volume,
                            turnover, amplitude, change_pct, change_amount, turnover_rate
                     FROM prices
                     WHERE stock_id = ?1
                       AND (?2 IS NULL OR date >= ?2)
                       AND (?3 IS NULL OR date <= ?3)
                     ORDER BY date ASC";

        let mut stmt = conn.prepare(query).map_err(query_err)?;
        let rows = stmt
            .query_map(params![stock_id, start_str, end_str], |row| {
                let date_str: String = row.get(0)?;
                Ok(PriceRow {
                    date: parse_date(&date_str)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                    turnover: row.get(6)?,
                    amplitude: row.get(7)?,
                    change_pct: row.get(8)?,
                    change_amount: row.get(9)?,
                    turnover_rate: row.get(10)?,
                })
            })
            .map_err(query_err)?;

        let mut prices = Vec::new();
        for row in rows {
            prices.push(row.map_err(query_err)?);
        }
        Ok(prices)
    }
}

impl ValueRepository for SqliteStore {
    fn read_values(&self, key: &CacheKey) -> Result<ValueMap, EngineError> {
        let conn = self.conn()?;

        let mut stmt;
        let rows = match key.tier {
            CacheTier::Shared => {
                stmt = conn
                    .prepare(
                        "SELECT date, value, group_values FROM indicator_values
                         WHERE indicator_id = ?1 AND stock_id = ?2
                         ORDER BY date ASC",
                    )
                    .map_err(query_err)?;
                stmt.query_map(params![key.indicator_id, key.stock_id], value_row)
            }
            CacheTier::Private(user) => {
                stmt = conn
                    .prepare(
                        "SELECT date, value, group_values FROM indicator_value_cache
                         WHERE user_id = ?1 AND indicator_id = ?2 AND stock_id = ?3
                         ORDER BY date ASC",
                    )
                    .map_err(query_err)?;
                stmt.query_map(params![user, key.indicator_id, key.stock_id], value_row)
            }
        }
        .map_err(query_err)?;

        let mut values = ValueMap::new();
        for row in rows {
            let (date, value, group_values) = row.map_err(query_err)?;
            values.insert(date, decode_value(value, group_values)?);
        }
        Ok(values)
    }

    fn replace_values(&self, key: &CacheKey, values: &ValueMap) -> Result<usize, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        match key.tier {
            CacheTier::Shared => {
                tx.execute(
                    "DELETE FROM indicator_values WHERE indicator_id = ?1 AND stock_id = ?2",
                    params![key.indicator_id, key.stock_id],
                )
                .map_err(query_err)?;
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO indicator_values (indicator_id, stock_id, date, value, group_values)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(query_err)?;
                for (date, value) in values {
                    let (scalar, group) = encode_value(value)?;
                    stmt.execute(params![
                        key.indicator_id,
                        key.stock_id,
                        date.format(DATE_FORMAT).to_string(),
                        scalar,
                        group
                    ])
                    .map_err(query_err)?;
                }
            }
            CacheTier::Private(user) => {
                tx.execute(
                    "DELETE FROM indicator_value_cache
                     WHERE user_id = ?1 AND indicator_id = ?2 AND stock_id = ?3",
                    params![user, key.indicator_id, key.stock_id],
                )
                .map_err(query_err)?;
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO indicator_value_cache
                             (user_id, indicator_id, stock_id, date, value, group_values)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .map_err(query_err)?;
                for (date, value) in values {
                    let (scalar, group) = encode_value(value)?;
                    stmt.execute(params![
                        user,
                        key.indicator_id,
                        key.stock_id,
                        date.format(DATE_FORMAT).to_string(),
                        scalar,
                        group
                    ])
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
        let conn = self.conn()?;
        match scope {
            TierScope::Shared => conn.execute(
                "DELETE FROM indicator_values
                 WHERE indicator_id = ?1 AND (?2 IS NULL OR stock_id = ?2)",
                params![indicator_id, stock_id],
            ),
            TierScope::Private(user_id) => conn.execute(
                "DELETE FROM indicator_value_cache
                 WHERE indicator_id = ?1 AND (?2 IS NULL OR stock_id = ?2)
                   AND (?3 IS NULL OR user_id = ?3)",
                params![indicator_id, stock_id, user_id],
            ),
        }
        .map_err(query_err)
    }
}
