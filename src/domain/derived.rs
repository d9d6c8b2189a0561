//! Derived per-(date, ticker) analytic record produced by the rolling engine.

use chrono::NaiveDate;
use std::fmt;

/// Primary key shared by raw and derived tables.
///
/// Ordered by ticker first so a sorted set of keys groups each ticker's
/// series together in chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub ticker: String,
    pub date: NaiveDate,
}

impl RecordKey {
    pub fn new(ticker: impl Into<String>, date: NaiveDate) -> Self {
        RecordKey {
            ticker: ticker.into(),
            date,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ticker, self.date.format("%Y%m%d"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub open_price: f64,
    pub close_price: f64,
    pub volume: i64,
    pub margin_balance_shares: i64,
    pub margin_cost_est: f64,
    /// Absent when the balance or the cost estimate is zero.
    pub margin_ratio: Option<f64>,
    pub margin_balance_amount: Option<f64>,
    pub avg_10day_ratio: Option<f64>,
    pub avg_10day_volume: Option<f64>,
    pub avg_5day_balance_x095: Option<f64>,
    /// Prior trading days of this ticker available to the trailing
    /// windows, capped at the longest window.
    pub window_days: u32,
}

impl DerivedRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.ticker.clone(), self.date)
    }

    /// Close above open. Taiwanese charts draw this candle red.
    pub fn is_red_candle(&self) -> bool {
        self.close_price > self.open_price
    }

    /// (ratio - avg) / avg, when both are defined and the average is non-zero.
    pub fn ratio_drop_pct(&self) -> Option<f64> {
        match (self.margin_ratio, self.avg_10day_ratio) {
            (Some(ratio), Some(avg)) if avg != 0.0 => Some((ratio - avg) / avg * 100.0),
            _ => None,
        }
    }
}
