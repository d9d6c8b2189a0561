//! Portfolio state and equity tracking for one backtest run.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::position::{Position, TradeRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
    pub cash: f64,
    pub open_positions: usize,
}

/// Cash, open positions and the ledger of one run.
///
/// Positions live in an ordered map so every pass over them visits tickers
/// in the same order, run after run.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioState {
    pub cash: f64,
    pub starting_capital: f64,
    pub positions: BTreeMap<String, Position>,
    pub closed_trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

impl PortfolioState {
    pub fn new(starting_capital: f64) -> Self {
        PortfolioState {
            cash: starting_capital,
            starting_capital,
            positions: BTreeMap::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn add_position(&mut self, position: Position) {
        self.positions.insert(position.ticker.clone(), position);
    }

    pub fn has_position(&self, ticker: &str) -> bool {
        self.positions.contains_key(ticker)
    }

    pub fn remove_position(&mut self, ticker: &str) -> Option<Position> {
        self.positions.remove(ticker)
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.closed_trades.push(trade);
    }

    pub fn record_equity(&mut self, date: NaiveDate, equity: f64) {
        self.equity_curve.push(EquityPoint {
            date,
            equity,
            cash: self.cash,
            open_positions: self.positions.len(),
        });
    }

    /// Cash plus open positions marked at `marks`. A position without a mark
    /// is carried at its entry price.
    pub fn total_equity(&self, marks: &BTreeMap<String, f64>) -> f64 {
        let position_value: f64 = self
            .positions
            .values()
            .map(|pos| {
                let price = marks.get(&pos.ticker).copied().unwrap_or(pos.entry_price);
                pos.market_value(price)
            })
            .sum();
        self.cash + position_value
    }
}
