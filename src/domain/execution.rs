//! Trade execution and fill simulation.
//!
//! Fills happen at the given market price with no slippage. Share counts
//! follow the board-lot convention and fees follow the commission/tax
//! schedule, which is frictionless by default.

use chrono::NaiveDate;

use super::portfolio::PortfolioState;
use super::position::{ExitReason, Position, TradeRecord};

/// Commission and tax schedule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeeSchedule {
    pub commission_rate: f64,
    pub commission_min_board_lot: f64,
    pub commission_min_odd_lot: f64,
    pub sell_tax_rate: f64,
}

impl FeeSchedule {
    /// Taiwan retail schedule: 0.1425% commission (min 20 / 1), 0.3% sell tax.
    pub fn taiwan_retail() -> Self {
        FeeSchedule {
            commission_rate: 0.001425,
            commission_min_board_lot: 20.0,
            commission_min_odd_lot: 1.0,
            sell_tax_rate: 0.003,
        }
    }

    /// max(value * rate, minimum). No commission when the rate is zero.
    pub fn commission(&self, value: f64, odd_lot: bool) -> f64 {
        if self.commission_rate <= 0.0 {
            return 0.0;
        }
        let minimum = if odd_lot {
            self.commission_min_odd_lot
        } else {
            self.commission_min_board_lot
        };
        (value * self.commission_rate).max(minimum)
    }

    pub fn sell_tax(&self, value: f64) -> f64 {
        value * self.sell_tax_rate
    }
}

/// Sizing and fee parameters for entries and exits.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub position_fraction: f64,
    pub board_lot: i64,
    pub fees: FeeSchedule,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            position_fraction: 0.1,
            board_lot: 1000,
            fees: FeeSchedule::default(),
        }
    }
}

/// Exit thresholds checked on each monitoring day.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitRules {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_holding_days: usize,
    pub enable_take_profit: bool,
    pub enable_stop_loss: bool,
}

impl Default for ExitRules {
    fn default() -> Self {
        ExitRules {
            take_profit: 0.40,
            stop_loss: 0.10,
            max_holding_days: 15,
            enable_take_profit: true,
            enable_stop_loss: true,
        }
    }
}

/// Share count for an allocation: whole board lots when at least one lot is
/// affordable, otherwise an odd lot. Returns (shares, is_odd_lot).
pub fn size_order(allocation: f64, price: f64, board_lot: i64) -> (i64, bool) {
    if price <= 0.0 || allocation <= 0.0 {
        return (0, false);
    }
    let shares = (allocation / price).floor() as i64;
    if board_lot > 1 && shares >= board_lot {
        ((shares / board_lot) * board_lot, false)
    } else {
        (shares, board_lot > 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered {
        shares: i64,
        price: f64,
        cost: f64,
        commission: f64,
    },
    InsufficientCapital {
        allocation: f64,
        shares: i64,
    },
}

/// Open a long position in `ticker` at `price`.
///
/// The allocation is `position_fraction` of cash at the time of the call,
/// so entries executed one after another on the same day each see the cash
/// left by the previous one.
pub fn enter_long(
    portfolio: &mut PortfolioState,
    ticker: &str,
    price: f64,
    date: NaiveDate,
    index: usize,
    signal_date: NaiveDate,
    config: &ExecutionConfig,
) -> EntryResult {
    let allocation = portfolio.cash * config.position_fraction;
    let (shares, odd_lot) = size_order(allocation, price, config.board_lot);

    if shares == 0 {
        return EntryResult::InsufficientCapital { allocation, shares };
    }

    let cost = shares as f64 * price;
    let commission = config.fees.commission(cost, odd_lot);
    let total_cost = cost + commission;

    if total_cost > portfolio.cash {
        return EntryResult::InsufficientCapital { allocation, shares };
    }

    portfolio.cash -= total_cost;
    portfolio.add_position(Position {
        ticker: ticker.to_string(),
        shares,
        entry_price: price,
        entry_date: date,
        entry_index: index,
        signal_date,
        entry_commission: commission,
    });

    EntryResult::Entered {
        shares,
        price,
        cost,
        commission,
    }
}

/// Close the position in `ticker` at `price` and append the trade to the
/// ledger. Returns `None` when no position is open.
pub fn exit_position(
    portfolio: &mut PortfolioState,
    ticker: &str,
    price: f64,
    date: NaiveDate,
    index: usize,
    reason: ExitReason,
    config: &ExecutionConfig,
) -> Option<TradeRecord> {
    let position = portfolio.remove_position(ticker)?;

    let odd_lot = config.board_lot > 1 && position.shares % config.board_lot != 0;
    let value = position.shares as f64 * price;
    let commission = config.fees.commission(value, odd_lot);
    let tax = config.fees.sell_tax(value);
    let proceeds = value - commission - tax;

    portfolio.cash += proceeds;

    let trade = TradeRecord {
        ticker: position.ticker.clone(),
        signal_date: position.signal_date,
        entry_date: position.entry_date,
        entry_price: position.entry_price,
        exit_date: date,
        exit_price: price,
        exit_reason: reason,
        shares: position.shares,
        holding_days: position.holding_days(index),
        commission: position.entry_commission + commission,
        tax,
        pnl: proceeds - (position.cost_basis() + position.entry_commission),
    };
    portfolio.record_trade(trade.clone());
    Some(trade)
}

/// First matching exit rule for a position at today's close:
/// take-profit, then stop-loss, then time-exit.
pub fn check_exit(
    position: &Position,
    close: f64,
    index: usize,
    rules: &ExitRules,
) -> Option<ExitReason> {
    let ret = position.unrealized_return(close);
    if rules.enable_take_profit && ret >= rules.take_profit {
        Some(ExitReason::TakeProfit)
    } else if rules.enable_stop_loss && ret <= -rules.stop_loss {
        Some(ExitReason::StopLoss)
    } else if position.holding_days(index) >= rules.max_holding_days {
        Some(ExitReason::TimeExit)
    } else {
        None
    }
}
