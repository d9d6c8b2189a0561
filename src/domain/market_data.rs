//! Derived records grouped into a unified trading-day timeline.

use crate::domain::derived::DerivedRecord;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One day's records keyed by ticker.
pub type DaySlice = BTreeMap<String, DerivedRecord>;

#[derive(Debug, Clone, Default)]
pub struct MarketData {
    dates: Vec<NaiveDate>,
    days: Vec<DaySlice>,
}

impl MarketData {
    /// Build the timeline from every date present in `records`. A later
    /// record for the same (date, ticker) replaces an earlier one.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = DerivedRecord>,
    {
        let mut by_date: BTreeMap<NaiveDate, DaySlice> = BTreeMap::new();
        for record in records {
            by_date
                .entry(record.date)
                .or_default()
                .insert(record.ticker.clone(), record);
        }
        let (dates, days): (Vec<_>, Vec<_>) = by_date.into_iter().unzip();
        MarketData { dates, days }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn date(&self, index: usize) -> Option<NaiveDate> {
        self.dates.get(index).copied()
    }

    pub fn day(&self, index: usize) -> Option<&DaySlice> {
        self.days.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ticker: &str, day: u32, close: f64) -> DerivedRecord {
        DerivedRecord {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            ticker: ticker.into(),
            open_price: close - 1.0,
            close_price: close,
            volume: 1000,
            margin_balance_shares: 100,
            margin_cost_est: close,
            margin_ratio: None,
            margin_balance_amount: None,
            avg_10day_ratio: None,
            avg_10day_volume: None,
            avg_5day_balance_x095: None,
            window_days: 0,
        }
    }

    #[test]
    fn timeline_is_sorted_union_of_dates() {
        let md = MarketData::from_records(vec![
            record("2330", 5, 100.0),
            record("2603", 4, 50.0),
            record("2330", 4, 99.0),
            record("2603", 6, 51.0),
        ]);
        let days: Vec<u32> = md.dates().iter().map(|d| chrono::Datelike::day(d)).collect();
        assert_eq!(days, vec![4, 5, 6]);
        assert_eq!(md.len(), 3);
    }

    #[test]
    fn lookups_by_index_and_ticker() {
        let md = MarketData::from_records(vec![record("2330", 4, 99.0), record("2603", 5, 51.0)]);
        let first = md.day(0).unwrap();
        assert_eq!(first["2330"].close_price, 99.0);
        assert!(!first.contains_key("2603"));
        assert!(md.day(1).unwrap().contains_key("2603"));
        assert!(md.day(2).is_none());
        assert!(md.date(2).is_none());
    }

    #[test]
    fn empty_input() {
        let md = MarketData::from_records(Vec::new());
        assert!(md.is_empty());
        assert!(md.dates().is_empty());
    }
}
