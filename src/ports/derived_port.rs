//! Persisted derived table: the contract boundary between the rolling
//! engine and the backtest.

use crate::domain::derived::DerivedRecord;
use crate::domain::error::MarginError;
use chrono::NaiveDate;

pub trait DerivedPort {
    /// Rows inside `[start, end]`, optionally for one ticker, ordered by
    /// date then ticker.
    fn fetch_derived(
        &self,
        ticker: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DerivedRecord>, MarginError>;

    /// Every row for `ticker` dated on or before `end`, oldest first.
    fn fetch_derived_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<DerivedRecord>, MarginError>;

    /// Delete `ticker`'s rows dated in `stale`, then insert or overwrite
    /// `records`, all in one transaction. Returns the number of rows written.
    fn replace_derived(
        &self,
        ticker: &str,
        stale: &[NaiveDate],
        records: &[DerivedRecord],
    ) -> Result<usize, MarginError>;

    fn delete_derived(
        &self,
        ticker: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize, MarginError>;

    /// (first date, last date, row count) for a ticker, if it has any rows.
    fn derived_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, MarginError>;
}
