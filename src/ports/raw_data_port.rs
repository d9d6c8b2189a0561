//! Read/write access to the raw price and margin series.

use crate::domain::error::MarginError;
use crate::domain::raw::{RawMarginRecord, RawPriceRecord};
use chrono::NaiveDate;

pub trait RawDataPort {
    /// Every price row for `ticker` dated on or before `end`, oldest first.
    fn fetch_price_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<RawPriceRecord>, MarginError>;

    /// Every margin row for `ticker` dated on or before `end`, oldest first.
    fn fetch_margin_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<RawMarginRecord>, MarginError>;

    /// Tickers with a price or a margin row inside `[start, end]`, sorted.
    fn list_tickers(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<String>, MarginError>;

    fn store_prices(&self, records: &[RawPriceRecord]) -> Result<usize, MarginError>;

    fn store_margins(&self, records: &[RawMarginRecord]) -> Result<usize, MarginError>;
}
