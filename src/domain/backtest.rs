//! Backtest engine and event loop.
//!
//! Each trading day of the timeline is processed in four steps:
//! 1. fill entries scheduled by the previous day's signals at today's open
//! 2. check exits for positions entered before today, at today's close
//! 3. evaluate today's signals and schedule entries for the next day
//! 4. record equity (cash plus positions at their last known close)
//!
//! Positions still open after the last day are closed at their last known
//! close with reason end-of-backtest.

use chrono::NaiveDate;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;

use super::derived::DerivedRecord;
use super::error::MarginError;
use super::execution::{
    EntryResult, ExecutionConfig, ExitRules, FeeSchedule, check_exit, enter_long, exit_position,
};
use super::market_data::MarketData;
use super::portfolio::{EquityPoint, PortfolioState};
use super::position::{ExitReason, TradeRecord};
use super::signal::{SignalParams, rank_signals};
use super::trade_date::format_trade_date;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub starting_capital: f64,
    pub position_fraction: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_holding_days: usize,
    pub enable_take_profit: bool,
    pub enable_stop_loss: bool,
    pub board_lot: i64,
    pub fees: FeeSchedule,
}

impl BacktestConfig {
    /// Default rule set over the given date range.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        let exec = ExecutionConfig::default();
        let rules = ExitRules::default();
        BacktestConfig {
            start_date,
            end_date,
            starting_capital: 1_000_000.0,
            position_fraction: exec.position_fraction,
            take_profit: rules.take_profit,
            stop_loss: rules.stop_loss,
            max_holding_days: rules.max_holding_days,
            enable_take_profit: rules.enable_take_profit,
            enable_stop_loss: rules.enable_stop_loss,
            board_lot: exec.board_lot,
            fees: exec.fees,
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            position_fraction: self.position_fraction,
            board_lot: self.board_lot,
            fees: self.fees.clone(),
        }
    }

    pub fn exit_rules(&self) -> ExitRules {
        ExitRules {
            take_profit: self.take_profit,
            stop_loss: self.stop_loss,
            max_holding_days: self.max_holding_days,
            enable_take_profit: self.enable_take_profit,
            enable_stop_loss: self.enable_stop_loss,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The allocation bought zero shares or the fill cost more than cash.
    InsufficientCapital { allocation: f64, shares: i64 },
    /// The ticker had no row on the entry day.
    NoEntryPrice,
    /// Signal on the final day of the range.
    NoNextTradingDay,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientCapital { allocation, shares } => write!(
                f,
                "insufficient capital (allocation {allocation:.2}, {shares} shares)"
            ),
            SkipReason::NoEntryPrice => write!(f, "no price on entry day"),
            SkipReason::NoNextTradingDay => write!(f, "no next trading day"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSignal {
    pub signal_date: NaiveDate,
    pub ticker: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub portfolio: PortfolioState,
    pub skipped_signals: Vec<SkippedSignal>,
    pub signals_generated: usize,
    pub trading_days: usize,
}

impl BacktestResult {
    pub fn trades(&self) -> &[TradeRecord] {
        &self.portfolio.closed_trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.portfolio.equity_curve
    }

    pub fn final_equity(&self) -> f64 {
        self.portfolio
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.portfolio.starting_capital)
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    ticker: String,
    signal_date: NaiveDate,
}

/// Simulate the strategy over `records` restricted to the configured range.
pub fn run_backtest(
    records: &[DerivedRecord],
    config: &BacktestConfig,
    signal_params: &SignalParams,
) -> Result<BacktestResult, MarginError> {
    if config.start_date > config.end_date {
        return Err(MarginError::InvalidInput {
            source_name: "backtest".into(),
            reason: format!(
                "start date {} is after end date {}",
                format_trade_date(config.start_date),
                format_trade_date(config.end_date)
            ),
        });
    }

    let market = MarketData::from_records(
        records
            .iter()
            .filter(|r| r.date >= config.start_date && r.date <= config.end_date)
            .cloned(),
    );
    if market.is_empty() {
        return Err(MarginError::NoData {
            what: "derived records".into(),
            start: format_trade_date(config.start_date),
            end: format_trade_date(config.end_date),
        });
    }

    let exec = config.execution_config();
    let rules = config.exit_rules();

    let mut portfolio = PortfolioState::new(config.starting_capital);
    let mut pending: Vec<PendingEntry> = Vec::new();
    let mut skipped: Vec<SkippedSignal> = Vec::new();
    let mut last_close: BTreeMap<String, f64> = BTreeMap::new();
    let mut signals_generated = 0usize;

    for (index, &date) in market.dates().iter().enumerate() {
        let Some(day) = market.day(index) else {
            continue;
        };

        for entry in pending.drain(..) {
            let Some(record) = day.get(&entry.ticker) else {
                info!(
                    "skipped signal {} from {}: no price on {}",
                    entry.ticker,
                    format_trade_date(entry.signal_date),
                    format_trade_date(date)
                );
                skipped.push(SkippedSignal {
                    signal_date: entry.signal_date,
                    ticker: entry.ticker,
                    reason: SkipReason::NoEntryPrice,
                });
                continue;
            };

            match enter_long(
                &mut portfolio,
                &entry.ticker,
                record.open_price,
                date,
                index,
                entry.signal_date,
                &exec,
            ) {
                EntryResult::Entered { shares, price, .. } => {
                    debug!(
                        "{} buy {} x{} @ {:.2}",
                        format_trade_date(date),
                        entry.ticker,
                        shares,
                        price
                    );
                }
                EntryResult::InsufficientCapital { allocation, shares } => {
                    info!(
                        "skipped signal {} from {}: allocation {:.2} cannot fill {} shares",
                        entry.ticker,
                        format_trade_date(entry.signal_date),
                        allocation,
                        shares
                    );
                    skipped.push(SkippedSignal {
                        signal_date: entry.signal_date,
                        ticker: entry.ticker,
                        reason: SkipReason::InsufficientCapital { allocation, shares },
                    });
                }
            }
        }

        for (ticker, record) in day {
            last_close.insert(ticker.clone(), record.close_price);
        }

        let exits: Vec<(String, f64, ExitReason)> = portfolio
            .positions
            .values()
            .filter(|pos| pos.entry_index < index)
            .filter_map(|pos| {
                let close = day.get(&pos.ticker)?.close_price;
                check_exit(pos, close, index, &rules).map(|reason| (pos.ticker.clone(), close, reason))
            })
            .collect();

        for (ticker, close, reason) in exits {
            if let Some(trade) =
                exit_position(&mut portfolio, &ticker, close, date, index, reason, &exec)
            {
                debug!(
                    "{} sell {} x{} @ {:.2} ({}) pnl {:.2}",
                    format_trade_date(date),
                    ticker,
                    trade.shares,
                    close,
                    reason,
                    trade.pnl
                );
            }
        }

        let candidates: Vec<&DerivedRecord> = day
            .values()
            .filter(|r| !portfolio.has_position(&r.ticker))
            .collect();
        let has_next_day = index + 1 < market.len();

        for signal in rank_signals(&candidates, signal_params) {
            signals_generated += 1;
            if has_next_day {
                pending.push(PendingEntry {
                    ticker: signal.record.ticker.clone(),
                    signal_date: date,
                });
            } else {
                info!(
                    "skipped signal {} on {}: last trading day of the range",
                    signal.record.ticker,
                    format_trade_date(date)
                );
                skipped.push(SkippedSignal {
                    signal_date: date,
                    ticker: signal.record.ticker.clone(),
                    reason: SkipReason::NoNextTradingDay,
                });
            }
        }

        let equity = portfolio.total_equity(&last_close);
        portfolio.record_equity(date, equity);
    }

    close_remaining(&mut portfolio, &market, &last_close, &exec);

    info!(
        "backtest {}..{}: {} trading days, {} signals, {} trades, {} skipped",
        format_trade_date(config.start_date),
        format_trade_date(config.end_date),
        market.len(),
        signals_generated,
        portfolio.closed_trades.len(),
        skipped.len()
    );

    Ok(BacktestResult {
        portfolio,
        skipped_signals: skipped,
        signals_generated,
        trading_days: market.len(),
    })
}

/// Force-close open positions on the final date and restate that day's
/// equity point so it reflects any exit fees.
fn close_remaining(
    portfolio: &mut PortfolioState,
    market: &MarketData,
    last_close: &BTreeMap<String, f64>,
    exec: &ExecutionConfig,
) {
    let last_index = market.len().saturating_sub(1);
    let Some(final_date) = market.date(last_index) else {
        return;
    };
    if portfolio.positions.is_empty() {
        return;
    }

    let open: Vec<(String, f64)> = portfolio
        .positions
        .values()
        .map(|pos| {
            let price = last_close.get(&pos.ticker).copied().unwrap_or(pos.entry_price);
            (pos.ticker.clone(), price)
        })
        .collect();

    for (ticker, price) in open {
        exit_position(
            portfolio,
            &ticker,
            price,
            final_date,
            last_index,
            ExitReason::EndOfBacktest,
            exec,
        );
    }

    let cash = portfolio.cash;
    if let Some(point) = portfolio.equity_curve.last_mut() {
        point.equity = cash;
        point.cash = cash;
        point.open_positions = 0;
    }
}
