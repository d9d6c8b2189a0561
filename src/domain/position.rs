//! Open positions and closed trade records.

use chrono::NaiveDate;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TimeExit,
    EndOfBacktest,
}

impl ExitReason {
    pub const ALL: [ExitReason; 4] = [
        ExitReason::TakeProfit,
        ExitReason::StopLoss,
        ExitReason::TimeExit,
        ExitReason::EndOfBacktest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take-profit",
            ExitReason::StopLoss => "stop-loss",
            ExitReason::TimeExit => "time-exit",
            ExitReason::EndOfBacktest => "end-of-backtest",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long position held between entry and exit.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub shares: i64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    /// Index of the entry day on the backtest timeline.
    pub entry_index: usize,
    pub signal_date: NaiveDate,
    pub entry_commission: f64,
}

impl Position {
    pub fn cost_basis(&self) -> f64 {
        self.shares as f64 * self.entry_price
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }

    /// (price - entry) / entry
    pub fn unrealized_return(&self, price: f64) -> f64 {
        if self.entry_price > 0.0 {
            (price - self.entry_price) / self.entry_price
        } else {
            0.0
        }
    }

    /// Trading days elapsed since the entry day.
    pub fn holding_days(&self, index: usize) -> usize {
        index.saturating_sub(self.entry_index)
    }
}

/// A completed round trip in the trade ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub ticker: String,
    pub signal_date: NaiveDate,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub shares: i64,
    pub holding_days: usize,
    /// Entry plus exit commission.
    pub commission: f64,
    pub tax: f64,
    pub pnl: f64,
}

impl TradeRecord {
    /// P&L as a fraction of the capital committed at entry.
    pub fn return_pct(&self) -> f64 {
        let committed = self.shares as f64 * self.entry_price;
        if committed > 0.0 {
            self.pnl / committed
        } else {
            0.0
        }
    }
}
