//! SQLite store for the raw series and the derived table.

use crate::domain::derived::DerivedRecord;
use crate::domain::error::MarginError;
use crate::domain::raw::{RawMarginRecord, RawPriceRecord};
use crate::domain::trade_date::{TRADE_DATE_FORMAT, format_trade_date};
use crate::ports::config_port::ConfigPort;
use crate::ports::derived_port::DerivedPort;
use crate::ports::raw_data_port::RawDataPort;
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Row, params};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS price_data (
        date TEXT NOT NULL,
        ticker TEXT NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume INTEGER NOT NULL,
        PRIMARY KEY (date, ticker)
    );
    CREATE INDEX IF NOT EXISTS idx_price_ticker ON price_data(ticker, date);

    CREATE TABLE IF NOT EXISTS margin_data (
        date TEXT NOT NULL,
        ticker TEXT NOT NULL,
        margin_balance_amount REAL,
        margin_balance_shares INTEGER NOT NULL,
        prev_balance_shares INTEGER NOT NULL,
        buy_shares INTEGER NOT NULL,
        sell_shares INTEGER NOT NULL,
        cash_repay_shares INTEGER NOT NULL,
        PRIMARY KEY (date, ticker)
    );
    CREATE INDEX IF NOT EXISTS idx_margin_ticker ON margin_data(ticker, date);

    CREATE TABLE IF NOT EXISTS derived_metrics (
        date TEXT NOT NULL,
        ticker TEXT NOT NULL,
        open_price REAL NOT NULL,
        close_price REAL NOT NULL,
        volume INTEGER NOT NULL,
        margin_balance_shares INTEGER NOT NULL,
        margin_cost_est REAL NOT NULL,
        margin_ratio REAL,
        margin_balance_amount REAL,
        avg_10day_ratio REAL,
        avg_10day_volume REAL,
        avg_5day_balance_x095 REAL,
        window_days INTEGER NOT NULL,
        PRIMARY KEY (date, ticker)
    );
    CREATE INDEX IF NOT EXISTS idx_derived_ticker ON derived_metrics(ticker, date);";

const DERIVED_COLUMNS: &str = "date, ticker, open_price, close_price, volume, margin_balance_shares,
     margin_cost_est, margin_ratio, margin_balance_amount, avg_10day_ratio, avg_10day_volume,
     avg_5day_balance_x095, window_days";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, MarginError> {
        let db_path = config
            .get_string("sqlite", "path")
            .ok_or_else(|| MarginError::config_missing("sqlite", "path"))?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| MarginError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    /// A single-connection pool over a private in-memory database.
    pub fn in_memory() -> Result<Self, MarginError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| MarginError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), MarginError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA).map_err(query_err)?;
        Ok(())
    }

    pub fn price_range(&self, ticker: &str) -> Result<Option<(NaiveDate, NaiveDate, usize)>, MarginError> {
        self.table_range("price_data", ticker)
    }

    pub fn margin_range(&self, ticker: &str) -> Result<Option<(NaiveDate, NaiveDate, usize)>, MarginError> {
        self.table_range("margin_data", ticker)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, MarginError> {
        self.pool.get().map_err(|e: r2d2::Error| MarginError::Database {
            reason: e.to_string(),
        })
    }

    fn table_range(
        &self,
        table: &str,
        ticker: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, MarginError> {
        let conn = self.conn()?;
        let query = format!("SELECT MIN(date), MAX(date), COUNT(*) FROM {table} WHERE ticker = ?1");

        let result: (Option<String>, Option<String>, i64) = conn
            .query_row(&query, params![ticker], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(query_err)?;

        match result {
            (Some(min_str), Some(max_str), count) if count > 0 => {
                let min = parse_stored_date(&min_str)?;
                let max = parse_stored_date(&max_str)?;
                Ok(Some((min, max, count as usize)))
            }
            _ => Ok(None),
        }
    }

    fn query_derived(
        &self,
        query: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<DerivedRecord>, MarginError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(query).map_err(query_err)?;
        let rows = stmt.query_map(params, derived_from_row).map_err(query_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(query_err)?);
        }
        Ok(records)
    }
}

fn query_err(e: rusqlite::Error) -> MarginError {
    MarginError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn parse_stored_date(value: &str) -> Result<NaiveDate, MarginError> {
    NaiveDate::parse_from_str(value, TRADE_DATE_FORMAT).map_err(|e: chrono::ParseError| {
        MarginError::DatabaseQuery {
            reason: format!("stored date {value:?}: {e}"),
        }
    })
}

fn row_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let date_str: String = row.get(idx)?;
    NaiveDate::parse_from_str(&date_str, TRADE_DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn derived_from_row(row: &Row<'_>) -> rusqlite::Result<DerivedRecord> {
    let window_days: i64 = row.get(12)?;
    Ok(DerivedRecord {
        date: row_date(row, 0)?,
        ticker: row.get(1)?,
        open_price: row.get(2)?,
        close_price: row.get(3)?,
        volume: row.get(4)?,
        margin_balance_shares: row.get(5)?,
        margin_cost_est: row.get(6)?,
        margin_ratio: row.get(7)?,
        margin_balance_amount: row.get(8)?,
        avg_10day_ratio: row.get(9)?,
        avg_10day_volume: row.get(10)?,
        avg_5day_balance_x095: row.get(11)?,
        window_days: window_days.max(0) as u32,
    })
}

impl RawDataPort for SqliteAdapter {
    fn fetch_price_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<RawPriceRecord>, MarginError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, ticker, open, high, low, close, volume
                 FROM price_data
                 WHERE ticker = ?1 AND date <= ?2
                 ORDER BY date ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![ticker, format_trade_date(end)], |row| {
                Ok(RawPriceRecord {
                    date: row_date(row, 0)?,
                    ticker: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                    volume: row.get(6)?,
                })
            })
            .map_err(query_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(query_err)?);
        }
        Ok(records)
    }

    fn fetch_margin_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<RawMarginRecord>, MarginError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, ticker, margin_balance_amount, margin_balance_shares,
                        prev_balance_shares, buy_shares, sell_shares, cash_repay_shares
                 FROM margin_data
                 WHERE ticker = ?1 AND date <= ?2
                 ORDER BY date ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![ticker, format_trade_date(end)], |row| {
                Ok(RawMarginRecord {
                    date: row_date(row, 0)?,
                    ticker: row.get(1)?,
                    margin_balance_amount: row.get(2)?,
                    margin_balance_shares: row.get(3)?,
                    prev_balance_shares: row.get(4)?,
                    buy_shares: row.get(5)?,
                    sell_shares: row.get(6)?,
                    cash_repay_shares: row.get(7)?,
                })
            })
            .map_err(query_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(query_err)?);
        }
        Ok(records)
    }

    fn list_tickers(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<String>, MarginError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ticker FROM price_data WHERE date >= ?1 AND date <= ?2
                 UNION
                 SELECT ticker FROM margin_data WHERE date >= ?1 AND date <= ?2
                 ORDER BY ticker",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![format_trade_date(start), format_trade_date(end)], |row| {
                row.get::<_, String>(0)
            })
            .map_err(query_err)?;

        let mut tickers = Vec::new();
        for row in rows {
            tickers.push(row.map_err(query_err)?);
        }
        Ok(tickers)
    }

    fn store_prices(&self, records: &[RawPriceRecord]) -> Result<usize, MarginError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for rec in records {
            tx.execute(
                "INSERT OR REPLACE INTO price_data (date, ticker, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    format_trade_date(rec.date),
                    rec.ticker,
                    rec.open,
                    rec.high,
                    rec.low,
                    rec.close,
                    rec.volume
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(records.len())
    }

    fn store_margins(&self, records: &[RawMarginRecord]) -> Result<usize, MarginError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for rec in records {
            tx.execute(
                "INSERT OR REPLACE INTO margin_data (date, ticker, margin_balance_amount,
                     margin_balance_shares, prev_balance_shares, buy_shares, sell_shares,
                     cash_repay_shares)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    format_trade_date(rec.date),
                    rec.ticker,
                    rec.margin_balance_amount,
                    rec.margin_balance_shares,
                    rec.prev_balance_shares,
                    rec.buy_shares,
                    rec.sell_shares,
                    rec.cash_repay_shares
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(records.len())
    }
}

impl DerivedPort for SqliteAdapter {
    fn fetch_derived(
        &self,
        ticker: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DerivedRecord>, MarginError> {
        let query = format!(
            "SELECT {DERIVED_COLUMNS} FROM derived_metrics
             WHERE (?1 IS NULL OR ticker = ?1) AND date >= ?2 AND date <= ?3
             ORDER BY date ASC, ticker ASC"
        );
        let start = format_trade_date(start);
        let end = format_trade_date(end);
        self.query_derived(&query, params![ticker, start, end])
    }

    fn fetch_derived_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<DerivedRecord>, MarginError> {
        let query = format!(
            "SELECT {DERIVED_COLUMNS} FROM derived_metrics
             WHERE ticker = ?1 AND date <= ?2
             ORDER BY date ASC"
        );
        let end = format_trade_date(end);
        self.query_derived(&query, params![ticker, end])
    }

    fn replace_derived(
        &self,
        ticker: &str,
        stale: &[NaiveDate],
        records: &[DerivedRecord],
    ) -> Result<usize, MarginError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;

        for date in stale {
            tx.execute(
                "DELETE FROM derived_metrics WHERE ticker = ?1 AND date = ?2",
                params![ticker, format_trade_date(*date)],
            )
            .map_err(query_err)?;
        }

        for rec in records {
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO derived_metrics ({DERIVED_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    format_trade_date(rec.date),
                    rec.ticker,
                    rec.open_price,
                    rec.close_price,
                    rec.volume,
                    rec.margin_balance_shares,
                    rec.margin_cost_est,
                    rec.margin_ratio,
                    rec.margin_balance_amount,
                    rec.avg_10day_ratio,
                    rec.avg_10day_volume,
                    rec.avg_5day_balance_x095,
                    rec.window_days
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(records.len())
    }

    fn delete_derived(
        &self,
        ticker: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize, MarginError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM derived_metrics
             WHERE (?1 IS NULL OR ticker = ?1) AND date >= ?2 AND date <= ?3",
            params![ticker, format_trade_date(start), format_trade_date(end)],
        )
        .map_err(query_err)
    }

    fn derived_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, MarginError> {
        self.table_range("derived_metrics", ticker)
    }
}
