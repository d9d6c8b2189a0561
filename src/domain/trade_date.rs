//! 8-digit trade date handling (`YYYYMMDD`).
//!
//! The exchange publishes every series keyed by an 8-digit calendar date, and
//! the store keeps that form so lexical and chronological order agree.

use crate::domain::error::MarginError;
use chrono::NaiveDate;

pub const TRADE_DATE_FORMAT: &str = "%Y%m%d";

pub fn parse_trade_date(value: &str) -> Result<NaiveDate, MarginError> {
    let trimmed = value.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MarginError::InvalidDate {
            value: value.to_string(),
        });
    }
    NaiveDate::parse_from_str(trimmed, TRADE_DATE_FORMAT).map_err(|_| MarginError::InvalidDate {
        value: value.to_string(),
    })
}

pub fn format_trade_date(date: NaiveDate) -> String {
    date.format(TRADE_DATE_FORMAT).to_string()
}
