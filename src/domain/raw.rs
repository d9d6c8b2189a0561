//! Raw daily price and margin records as delivered by the acquisition side.

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub struct RawPriceRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMarginRecord {
    pub date: NaiveDate,
    pub ticker: String,
    /// Balance value as reported, when the source publishes one.
    pub margin_balance_amount: Option<f64>,
    pub margin_balance_shares: i64,
    pub prev_balance_shares: i64,
    pub buy_shares: i64,
    pub sell_shares: i64,
    pub cash_repay_shares: i64,
}

impl RawMarginRecord {
    /// Shares carried over from the previous day after repayments and sales.
    pub fn retained_shares(&self) -> i64 {
        self.prev_balance_shares - self.cash_repay_shares - self.sell_shares
    }
}
