#![allow(dead_code)]

use chrono::NaiveDate;
use std::cell::RefCell;
use std::collections::BTreeMap;
use twmargin::domain::derived::DerivedRecord;
use twmargin::domain::error::MarginError;
pub use twmargin::domain::raw::{RawMarginRecord, RawPriceRecord};
use twmargin::ports::derived_port::DerivedPort;
use twmargin::ports::raw_data_port::RawDataPort;

type Key = (String, NaiveDate);

/// In-memory raw and derived tables keyed like the sqlite store.
#[derive(Default)]
pub struct MemoryStore {
    pub prices: RefCell<BTreeMap<Key, RawPriceRecord>>,
    pub margins: RefCell<BTreeMap<Key, RawMarginRecord>>,
    pub derived: RefCell<BTreeMap<Key, DerivedRecord>>,
    pub failing_ticker: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(self, prices: Vec<RawPriceRecord>, margins: Vec<RawMarginRecord>) -> Self {
        self.store_prices(&prices).unwrap();
        self.store_margins(&margins).unwrap();
        self
    }

    /// Every derived write for `ticker` fails.
    pub fn failing_on(mut self, ticker: &str) -> Self {
        self.failing_ticker = Some(ticker.to_string());
        self
    }

    pub fn derived_rows(&self, ticker: &str) -> Vec<DerivedRecord> {
        self.derived
            .borrow()
            .values()
            .filter(|r| r.ticker == ticker)
            .cloned()
            .collect()
    }
}

impl RawDataPort for MemoryStore {
    fn fetch_price_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<RawPriceRecord>, MarginError> {
        Ok(self
            .prices
            .borrow()
            .values()
            .filter(|r| r.ticker == ticker && r.date <= end)
            .cloned()
            .collect())
    }

    fn fetch_margin_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<RawMarginRecord>, MarginError> {
        Ok(self
            .margins
            .borrow()
            .values()
            .filter(|r| r.ticker == ticker && r.date <= end)
            .cloned()
            .collect())
    }

    fn list_tickers(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<String>, MarginError> {
        let mut tickers: Vec<String> = self
            .prices
            .borrow()
            .keys()
            .chain(self.margins.borrow().keys())
            .filter(|(_, date)| *date >= start && *date <= end)
            .map(|(ticker, _)| ticker.clone())
            .collect();
        tickers.sort();
        tickers.dedup();
        Ok(tickers)
    }

    fn store_prices(&self, records: &[RawPriceRecord]) -> Result<usize, MarginError> {
        let mut prices = self.prices.borrow_mut();
        for r in records {
            prices.insert((r.ticker.clone(), r.date), r.clone());
        }
        Ok(records.len())
    }

    fn store_margins(&self, records: &[RawMarginRecord]) -> Result<usize, MarginError> {
        let mut margins = self.margins.borrow_mut();
        for r in records {
            margins.insert((r.ticker.clone(), r.date), r.clone());
        }
        Ok(records.len())
    }
}

impl DerivedPort for MemoryStore {
    fn fetch_derived(
        &self,
        ticker: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DerivedRecord>, MarginError> {
        let mut rows: Vec<DerivedRecord> = self
            .derived
            .borrow()
            .values()
            .filter(|r| ticker.is_none_or(|t| r.ticker == t))
            .filter(|r| r.date >= start && r.date <= end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.ticker.cmp(&b.ticker)));
        Ok(rows)
    }

    fn fetch_derived_history(
        &self,
        ticker: &str,
        end: NaiveDate,
    ) -> Result<Vec<DerivedRecord>, MarginError> {
        Ok(self
            .derived
            .borrow()
            .values()
            .filter(|r| r.ticker == ticker && r.date <= end)
            .cloned()
            .collect())
    }

    fn replace_derived(
        &self,
        ticker: &str,
        stale: &[NaiveDate],
        records: &[DerivedRecord],
    ) -> Result<usize, MarginError> {
        if self.failing_ticker.as_deref() == Some(ticker) {
            return Err(MarginError::DatabaseQuery {
                reason: format!("injected failure for {ticker}"),
            });
        }
        let mut derived = self.derived.borrow_mut();
        for date in stale {
            derived.remove(&(ticker.to_string(), *date));
        }
        for r in records {
            derived.insert((r.ticker.clone(), r.date), r.clone());
        }
        Ok(records.len())
    }

    fn delete_derived(
        &self,
        ticker: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize, MarginError> {
        let mut derived = self.derived.borrow_mut();
        let before = derived.len();
        derived.retain(|(t, date), _| {
            !(ticker.is_none_or(|want| t == want) && *date >= start && *date <= end)
        });
        Ok(before - derived.len())
    }

    fn derived_range(
        &self,
        ticker: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, MarginError> {
        let derived = self.derived.borrow();
        let dates: Vec<NaiveDate> = derived
            .keys()
            .filter(|(t, _)| t == ticker)
            .map(|(_, d)| *d)
            .collect();
        Ok(match (dates.first(), dates.last()) {
            (Some(first), Some(last)) => Some((*first, *last, dates.len())),
            _ => None,
        })
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Trading day `n` of the synthetic calendar, starting 2024-01-01.
pub fn day(n: usize) -> NaiveDate {
    date(2024, 1, 1) + chrono::Duration::days(n as i64)
}

/// One day of market activity for [`build_series`].
#[derive(Debug, Clone, Copy)]
pub struct DayPlan {
    pub close: f64,
    pub volume: i64,
    pub buy: i64,
    pub sell: i64,
    pub repay: i64,
}

/// Turn day plans into consistent price and margin rows for `ticker`.
///
/// Sells and repayments are clipped so the balance never goes negative,
/// and each day's previous balance matches the prior day's balance.
pub fn build_series(ticker: &str, days: &[DayPlan]) -> (Vec<RawPriceRecord>, Vec<RawMarginRecord>) {
    let mut prices = Vec::with_capacity(days.len());
    let mut margins = Vec::with_capacity(days.len());
    let mut balance = 0i64;

    for (i, plan) in days.iter().enumerate() {
        let open = if i % 3 == 0 { plan.close - 1.0 } else { plan.close + 0.5 };
        prices.push(RawPriceRecord {
            date: day(i),
            ticker: ticker.to_string(),
            open,
            high: plan.close.max(open) + 1.0,
            low: plan.close.min(open) - 1.0,
            close: plan.close,
            volume: plan.volume,
        });

        let prev = balance;
        let sell = plan.sell.min(prev);
        let repay = plan.repay.min(prev - sell);
        balance = prev - sell - repay + plan.buy;
        margins.push(RawMarginRecord {
            date: day(i),
            ticker: ticker.to_string(),
            margin_balance_amount: None,
            margin_balance_shares: balance,
            prev_balance_shares: prev,
            buy_shares: plan.buy,
            sell_shares: sell,
            cash_repay_shares: repay,
        });
    }
    (prices, margins)
}

/// A deterministic, ticker-dependent series with a positive balance every day.
pub fn synthetic_series(ticker: &str, days: usize) -> (Vec<RawPriceRecord>, Vec<RawMarginRecord>) {
    let seed: usize = ticker.bytes().map(|b| b as usize).sum();
    let base = 40.0 + (seed % 50) as f64;
    let plans: Vec<DayPlan> = (0..days)
        .map(|i| DayPlan {
            close: base + ((i * 7 + seed) % 11) as f64 - 5.0 + i as f64 * 0.3,
            volume: 10_000 + ((i * 37 + seed) % 17) as i64 * 500,
            buy: 200 + ((i * 13 + seed) % 9) as i64 * 50,
            sell: ((i * 5 + seed) % 7) as i64 * 20,
            repay: ((i * 3 + seed) % 5) as i64 * 10,
        })
        .collect();
    build_series(ticker, &plans)
}

/// A store holding synthetic series for every ticker in `tickers`.
pub fn store_with(tickers: &[&str], days: usize) -> MemoryStore {
    tickers.iter().fold(MemoryStore::new(), |store, ticker| {
        let (prices, margins) = synthetic_series(ticker, days);
        store.with_series(prices, margins)
    })
}

/// A derived row for backtests; `signal` makes it pass every entry condition.
pub fn derived_row(ticker: &str, n: usize, open: f64, close: f64, signal: bool) -> DerivedRecord {
    DerivedRecord {
        date: day(n),
        ticker: ticker.to_string(),
        open_price: open,
        close_price: close,
        volume: 20_000,
        margin_balance_shares: 10_000,
        margin_cost_est: 50.0,
        margin_ratio: Some(if signal { 150.0 } else { 250.0 }),
        margin_balance_amount: None,
        avg_10day_ratio: Some(200.0),
        avg_10day_volume: Some(10_000.0),
        avg_5day_balance_x095: Some(9_000.0),
        window_days: 10,
    }
}
