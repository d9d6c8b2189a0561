//! Rolling metrics engine.
//!
//! Turns each ticker's raw price and margin series into [`DerivedRecord`]s:
//! a weighted-average margin cost estimate, the maintenance ratio built on
//! it, and trailing averages over the ticker's own prior trading days.
//!
//! The cost estimate is path dependent (each day blends the previous day's
//! cost), so a ticker's series is always walked from its first raw row in
//! date order, whatever order the requested keys arrive in. In incremental
//! mode, rows already in the store are adopted as the carried state instead
//! of being recomputed.

use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::str::FromStr;

use crate::domain::derived::{DerivedRecord, RecordKey};
use crate::domain::error::MarginError;
use crate::domain::raw::{RawMarginRecord, RawPriceRecord};
use crate::ports::derived_port::DerivedPort;
use crate::ports::raw_data_port::RawDataPort;

/// What to do when fewer prior days exist than a window asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Average whatever prior days exist; with none, use the day's own value.
    Partial,
    /// Leave the aggregate absent until the full window is available.
    Strict,
}

impl FromStr for WindowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "partial" => Ok(WindowPolicy::Partial),
            "strict" => Ok(WindowPolicy::Strict),
            other => Err(format!("unknown window policy {other:?} (expected partial or strict)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollingParams {
    /// Fraction of the purchase financed by the broker.
    pub loan_ratio: f64,
    pub ratio_window: usize,
    pub volume_window: usize,
    pub balance_window: usize,
    pub balance_factor: f64,
    pub window_policy: WindowPolicy,
}

impl Default for RollingParams {
    fn default() -> Self {
        RollingParams {
            loan_ratio: 0.6,
            ratio_window: 10,
            volume_window: 10,
            balance_window: 5,
            balance_factor: 0.95,
            window_policy: WindowPolicy::Partial,
        }
    }
}

impl RollingParams {
    pub fn longest_window(&self) -> usize {
        self.ratio_window
            .max(self.volume_window)
            .max(self.balance_window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeMode {
    /// Only fill keys that have no derived row yet.
    Incremental,
    /// Recompute every requested key and overwrite.
    Force,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComputeRange {
    /// Every key with raw data inside the span, optionally for some tickers.
    Span {
        start: NaiveDate,
        end: NaiveDate,
        tickers: Option<Vec<String>>,
    },
    /// An explicit set of keys; order and duplicates do not matter.
    Keys(Vec<RecordKey>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSide {
    Price,
    Margin,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotFound {
    pub key: RecordKey,
    pub missing: MissingSide,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeReport {
    pub tickers: usize,
    pub computed: usize,
    pub skipped_existing: usize,
    pub not_found: Vec<NotFound>,
}

/// Weighted-average cost basis of the outstanding margin balance.
///
/// - balance today is zero: 0
/// - balance yesterday was zero: today's close
/// - otherwise: ((prev - repay - sell) * prev_cost + buy * close) / balance
pub fn estimate_margin_cost(margin: &RawMarginRecord, prev_cost: f64, close: f64) -> f64 {
    if margin.margin_balance_shares == 0 {
        return 0.0;
    }
    if margin.prev_balance_shares == 0 {
        return close;
    }
    let numerator =
        margin.retained_shares() as f64 * prev_cost + margin.buy_shares as f64 * close;
    numerator / margin.margin_balance_shares as f64
}

/// close / (cost * loan_ratio) * 100; absent when nothing is borrowed.
pub fn margin_ratio(close: f64, cost: f64, balance_shares: i64, loan_ratio: f64) -> Option<f64> {
    if balance_shares == 0 || !(cost > 0.0) || !(loan_ratio > 0.0) {
        return None;
    }
    Some(close / (cost * loan_ratio) * 100.0)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Carried state for one ticker's chronological walk.
pub struct SeriesState<'p> {
    params: &'p RollingParams,
    prev_cost: Option<f64>,
    history: VecDeque<DerivedRecord>,
}

impl<'p> SeriesState<'p> {
    pub fn new(params: &'p RollingParams) -> Self {
        SeriesState {
            params,
            prev_cost: None,
            history: VecDeque::with_capacity(params.longest_window() + 1),
        }
    }

    /// Derive the next day of the series and push it onto the window.
    pub fn advance(&mut self, price: &RawPriceRecord, margin: &RawMarginRecord) -> DerivedRecord {
        let prev_cost = match self.prev_cost {
            Some(cost) => cost,
            None => {
                if margin.prev_balance_shares != 0 && margin.margin_balance_shares != 0 {
                    warn!(
                        "{}@{}: no prior cost basis for {} carried shares, seeding with close {}",
                        price.ticker,
                        price.date.format("%Y%m%d"),
                        margin.prev_balance_shares,
                        price.close
                    );
                }
                price.close
            }
        };

        let cost = estimate_margin_cost(margin, prev_cost, price.close);
        let ratio = margin_ratio(
            price.close,
            cost,
            margin.margin_balance_shares,
            self.params.loan_ratio,
        );
        let balance = margin.margin_balance_shares;

        let avg_ratio = self.aggregate(self.params.ratio_window, ratio, |r| r.margin_ratio);
        let avg_volume = self.aggregate(
            self.params.volume_window,
            Some(price.volume as f64),
            |r| (r.volume > 0).then_some(r.volume as f64),
        );
        let avg_balance = self.aggregate(self.params.balance_window, Some(balance as f64), |r| {
            (r.margin_balance_shares > 0).then_some(r.margin_balance_shares as f64)
        });

        let record = DerivedRecord {
            date: price.date,
            ticker: price.ticker.clone(),
            open_price: price.open,
            close_price: price.close,
            volume: price.volume,
            margin_balance_shares: balance,
            margin_cost_est: cost,
            margin_ratio: ratio,
            margin_balance_amount: ratio.map(|_| balance as f64 * cost),
            avg_10day_ratio: avg_ratio,
            avg_10day_volume: avg_volume,
            avg_5day_balance_x095: avg_balance.map(|b| b * self.params.balance_factor),
            window_days: self.history.len().min(self.params.longest_window()) as u32,
        };

        self.adopt(record.clone());
        record
    }

    /// Take an already-derived record as the latest day of the series.
    pub fn adopt(&mut self, record: DerivedRecord) {
        self.prev_cost = Some(record.margin_cost_est);
        self.history.push_back(record);
        while self.history.len() > self.params.longest_window() {
            self.history.pop_front();
        }
    }

    fn aggregate<F>(&self, window: usize, today: Option<f64>, value: F) -> Option<f64>
    where
        F: Fn(&DerivedRecord) -> Option<f64>,
    {
        let available = self.history.len().min(window);
        let values: Vec<f64> = self
            .history
            .iter()
            .rev()
            .take(window)
            .filter_map(&value)
            .collect();

        match self.params.window_policy {
            WindowPolicy::Strict => {
                if available < window || values.is_empty() {
                    None
                } else {
                    Some(mean(&values))
                }
            }
            WindowPolicy::Partial => {
                if values.is_empty() {
                    today
                } else {
                    Some(mean(&values))
                }
            }
        }
    }
}

/// Derive a whole series in memory. Rows are joined on date; days present
/// on only one side are dropped.
pub fn derive_series(
    prices: &[RawPriceRecord],
    margins: &[RawMarginRecord],
    params: &RollingParams,
) -> Vec<DerivedRecord> {
    let price_by_date: BTreeMap<NaiveDate, &RawPriceRecord> =
        prices.iter().map(|p| (p.date, p)).collect();
    let margin_by_date: BTreeMap<NaiveDate, &RawMarginRecord> =
        margins.iter().map(|m| (m.date, m)).collect();

    let mut state = SeriesState::new(params);
    price_by_date
        .iter()
        .filter_map(|(date, price)| margin_by_date.get(date).map(|margin| (*price, *margin)))
        .map(|(price, margin)| state.advance(price, margin))
        .collect()
}

enum Wanted {
    Dates(BTreeSet<NaiveDate>),
    Span(NaiveDate, NaiveDate),
}

impl Wanted {
    fn covers(&self, date: NaiveDate) -> bool {
        match self {
            Wanted::Dates(dates) => dates.contains(&date),
            Wanted::Span(start, end) => *start <= date && date <= *end,
        }
    }

    fn last_date(&self) -> Option<NaiveDate> {
        match self {
            Wanted::Dates(dates) => dates.iter().next_back().copied(),
            Wanted::Span(_, end) => Some(*end),
        }
    }
}

pub struct RollingEngine<'a> {
    raw: &'a dyn RawDataPort,
    store: &'a dyn DerivedPort,
    params: RollingParams,
}

impl<'a> RollingEngine<'a> {
    pub fn new(raw: &'a dyn RawDataPort, store: &'a dyn DerivedPort, params: RollingParams) -> Self {
        RollingEngine { raw, store, params }
    }

    /// Compute derived rows for `range`.
    ///
    /// Keys without both raw rows are reported in [`ComputeReport::not_found`]
    /// and do not stop the batch. Storage failures abort with the error; a
    /// ticker's rows are written in a single all-or-nothing batch.
    pub fn compute(
        &self,
        range: &ComputeRange,
        mode: ComputeMode,
    ) -> Result<ComputeReport, MarginError> {
        let wanted = self.resolve(range)?;
        let mut report = ComputeReport {
            tickers: wanted.len(),
            ..Default::default()
        };

        for (ticker, wanted) in &wanted {
            self.compute_ticker(ticker, wanted, mode, &mut report)?;
        }

        info!(
            "rolling compute ({:?}): {} tickers, {} computed, {} already present, {} not found",
            mode,
            report.tickers,
            report.computed,
            report.skipped_existing,
            report.not_found.len()
        );
        Ok(report)
    }

    fn resolve(&self, range: &ComputeRange) -> Result<BTreeMap<String, Wanted>, MarginError> {
        let mut wanted = BTreeMap::new();
        match range {
            ComputeRange::Keys(keys) => {
                for key in keys {
                    let entry = wanted
                        .entry(key.ticker.clone())
                        .or_insert_with(|| Wanted::Dates(BTreeSet::new()));
                    if let Wanted::Dates(dates) = entry {
                        dates.insert(key.date);
                    }
                }
            }
            ComputeRange::Span {
                start,
                end,
                tickers,
            } => {
                if start > end {
                    return Err(MarginError::InvalidInput {
                        source_name: "compute range".into(),
                        reason: format!("start {start} is after end {end}"),
                    });
                }
                let tickers = match tickers {
                    Some(list) => list.iter().map(|t| t.trim().to_string()).collect(),
                    None => self.raw.list_tickers(*start, *end)?,
                };
                for ticker in tickers.into_iter().filter(|t| !t.is_empty()) {
                    wanted.insert(ticker, Wanted::Span(*start, *end));
                }
            }
        }
        Ok(wanted)
    }

    fn compute_ticker(
        &self,
        ticker: &str,
        wanted: &Wanted,
        mode: ComputeMode,
        report: &mut ComputeReport,
    ) -> Result<(), MarginError> {
        let Some(end) = wanted.last_date() else {
            return Ok(());
        };

        let prices = self.raw.fetch_price_history(ticker, end)?;
        let margins = self.raw.fetch_margin_history(ticker, end)?;
        let price_by_date: BTreeMap<NaiveDate, &RawPriceRecord> =
            prices.iter().map(|p| (p.date, p)).collect();
        let margin_by_date: BTreeMap<NaiveDate, &RawMarginRecord> =
            margins.iter().map(|m| (m.date, m)).collect();

        let requested: BTreeSet<NaiveDate> = match wanted {
            Wanted::Dates(dates) => dates.clone(),
            Wanted::Span(start, end) => price_by_date
                .range(*start..=*end)
                .map(|(d, _)| *d)
                .chain(margin_by_date.range(*start..=*end).map(|(d, _)| *d))
                .collect(),
        };

        for date in &requested {
            let missing = match (price_by_date.contains_key(date), margin_by_date.contains_key(date)) {
                (true, true) => continue,
                (false, true) => MissingSide::Price,
                (true, false) => MissingSide::Margin,
                (false, false) => MissingSide::Both,
            };
            let key = RecordKey::new(ticker, *date);
            warn!("{key}: raw data not found ({missing:?} missing), skipping");
            report.not_found.push(NotFound { key, missing });
        }

        let stored = self.store.fetch_derived_history(ticker, end)?;
        // Rows whose raw data has since been removed must not survive a
        // forced recompute.
        let stale: Vec<NaiveDate> = match mode {
            ComputeMode::Force => stored
                .iter()
                .map(|r| r.date)
                .filter(|d| wanted.covers(*d))
                .filter(|d| !(price_by_date.contains_key(d) && margin_by_date.contains_key(d)))
                .collect(),
            ComputeMode::Incremental => Vec::new(),
        };
        let existing: BTreeMap<NaiveDate, DerivedRecord> = match mode {
            ComputeMode::Incremental => stored.into_iter().map(|r| (r.date, r)).collect(),
            ComputeMode::Force => BTreeMap::new(),
        };

        let mut state = SeriesState::new(&self.params);
        let mut to_write = Vec::new();

        for (date, price) in &price_by_date {
            let Some(margin) = margin_by_date.get(date) else {
                continue;
            };
            let is_requested = requested.contains(date);

            if let Some(record) = existing.get(date) {
                state.adopt(record.clone());
                if is_requested {
                    report.skipped_existing += 1;
                }
                continue;
            }

            let record = state.advance(price, margin);
            if is_requested {
                to_write.push(record);
            }
        }

        if !to_write.is_empty() || !stale.is_empty() {
            let written = self.store.replace_derived(ticker, &stale, &to_write)?;
            if !stale.is_empty() {
                warn!(
                    "{ticker}: removed {} derived rows with no matching raw data",
                    stale.len()
                );
            }
            debug!("{ticker}: wrote {written} derived rows");
            report.computed += written;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + chrono::Duration::days(n as i64)
    }

    fn price(n: u32, close: f64, volume: i64) -> RawPriceRecord {
        RawPriceRecord {
            date: day(n),
            ticker: "2330".into(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume,
        }
    }

    fn margin(n: u32, prev: i64, buy: i64, sell: i64, repay: i64) -> RawMarginRecord {
        RawMarginRecord {
            date: day(n),
            ticker: "2330".into(),
            margin_balance_amount: None,
            margin_balance_shares: prev + buy - sell - repay,
            prev_balance_shares: prev,
            buy_shares: buy,
            sell_shares: sell,
            cash_repay_shares: repay,
        }
    }

    #[test]
    fn cost_resets_when_balance_is_zero() {
        let m = margin(0, 1000, 0, 600, 400);
        assert_eq!(m.margin_balance_shares, 0);
        assert_eq!(estimate_margin_cost(&m, 50.0, 55.0), 0.0);
    }

    #[test]
    fn cost_starts_at_close_after_flat_balance() {
        let m = margin(0, 0, 1000, 0, 0);
        assert_eq!(estimate_margin_cost(&m, 0.0, 42.0), 42.0);
    }

    #[test]
    fn cost_is_weighted_blend() {
        // retained 1000 - 100 - 100 = 800 at 50, bought 200 at 60 → 52
        let m = margin(0, 1000, 200, 100, 100);
        assert_relative_eq!(estimate_margin_cost(&m, 50.0, 60.0), 52.0);
    }

    #[test]
    fn ratio_uses_loan_ratio() {
        // 60 / (50 * 0.6) * 100 = 200
        assert_relative_eq!(margin_ratio(60.0, 50.0, 1000, 0.6).unwrap(), 200.0);
    }

    #[test]
    fn ratio_absent_for_zero_balance_or_cost() {
        assert!(margin_ratio(60.0, 50.0, 0, 0.6).is_none());
        assert!(margin_ratio(60.0, 0.0, 1000, 0.6).is_none());
    }

    #[test]
    fn first_day_partial_window_uses_own_values() {
        let params = RollingParams::default();
        let series = derive_series(&[price(0, 100.0, 5000)], &[margin(0, 0, 1000, 0, 0)], &params);
        let rec = &series[0];
        assert_eq!(rec.window_days, 0);
        assert_eq!(rec.avg_10day_ratio, rec.margin_ratio);
        assert_eq!(rec.avg_10day_volume, Some(5000.0));
        assert_relative_eq!(rec.avg_5day_balance_x095.unwrap(), 1000.0 * 0.95);
    }

    #[test]
    fn strict_window_withholds_until_full() {
        let params = RollingParams {
            window_policy: WindowPolicy::Strict,
            ..Default::default()
        };
        let prices: Vec<_> = (0..12).map(|i| price(i, 100.0 + i as f64, 1000)).collect();
        let mut margins = vec![margin(0, 0, 1000, 0, 0)];
        for i in 1..12 {
            margins.push(margin(i, 1000, 0, 0, 0));
        }
        let series = derive_series(&prices, &margins, &params);

        assert!(series[0].avg_5day_balance_x095.is_none());
        assert!(series[4].avg_5day_balance_x095.is_none());
        assert!(series[5].avg_5day_balance_x095.is_some());
        assert!(series[9].avg_10day_ratio.is_none());
        assert!(series[9].avg_10day_volume.is_none());
        assert!(series[10].avg_10day_ratio.is_some());
        assert_eq!(series[10].avg_10day_volume, Some(1000.0));
        assert_eq!(series[11].window_days, 10);
    }

    #[test]
    fn averages_exclude_current_day() {
        let params = RollingParams::default();
        let prices = vec![price(0, 100.0, 1000), price(1, 100.0, 3000), price(2, 100.0, 9000)];
        let margins = vec![
            margin(0, 0, 1000, 0, 0),
            margin(1, 1000, 0, 0, 0),
            margin(2, 1000, 0, 0, 0),
        ];
        let series = derive_series(&prices, &margins, &params);
        assert_relative_eq!(series[2].avg_10day_volume.unwrap(), 2000.0);
        assert_eq!(series[2].window_days, 2);
    }

    #[test]
    fn gaps_are_absent_not_zero() {
        let params = RollingParams::default();
        // day 1 has no margin row: it must not enter the window as a zero
        let prices = vec![price(0, 100.0, 1000), price(1, 100.0, 0), price(2, 100.0, 5000)];
        let margins = vec![margin(0, 0, 1000, 0, 0), margin(2, 1000, 0, 0, 0)];
        let series = derive_series(&prices, &margins, &params);
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].date, day(2));
        assert_relative_eq!(series[1].avg_10day_volume.unwrap(), 1000.0);
        assert_eq!(series[1].window_days, 1);
    }

    #[test]
    fn zero_balance_day_has_no_ratio_and_skips_balance_average() {
        let params = RollingParams::default();
        let prices: Vec<_> = (0..3).map(|i| price(i, 100.0, 1000)).collect();
        let margins = vec![
            margin(0, 0, 1000, 0, 0),
            margin(1, 1000, 0, 0, 1000),
            margin(2, 0, 500, 0, 0),
        ];
        let series = derive_series(&prices, &margins, &params);
        assert!(series[1].margin_ratio.is_none());
        assert!(series[1].margin_balance_amount.is_none());
        assert_eq!(series[1].margin_cost_est, 0.0);
        // only day 0's positive balance counts
        assert_relative_eq!(series[2].avg_5day_balance_x095.unwrap(), 1000.0 * 0.95);
        // the ratio average skips the absent day
        assert_eq!(series[2].avg_10day_ratio, series[0].margin_ratio);
    }

    #[test]
    fn window_policy_parses() {
        assert_eq!("Strict".parse::<WindowPolicy>(), Ok(WindowPolicy::Strict));
        assert_eq!("partial".parse::<WindowPolicy>(), Ok(WindowPolicy::Partial));
        assert!("loose".parse::<WindowPolicy>().is_err());
    }
}
