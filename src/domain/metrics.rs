//! Performance metrics and statistics.

use super::portfolio::{EquityPoint, PortfolioState};
use super::position::{ExitReason, TradeRecord};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ExitReasonStats {
    pub reason: ExitReason,
    pub count: usize,
    pub avg_return: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub starting_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration: i64,
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_days: f64,
    pub total_commission: f64,
    pub total_tax: f64,
    pub exit_reasons: Vec<ExitReasonStats>,
}

impl Metrics {
    pub fn compute(portfolio: &PortfolioState) -> Self {
        let equity_curve = &portfolio.equity_curve;
        let trades = &portfolio.closed_trades;
        let starting_capital = portfolio.starting_capital;

        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(starting_capital);

        let total_return = if starting_capital > 0.0 {
            (final_equity - starting_capital) / starting_capital
        } else {
            0.0
        };

        let years = equity_curve.len() as f64 / TRADING_DAYS_PER_YEAR;
        let annualized_return = if years > 0.0 && total_return > -1.0 {
            (1.0 + total_return).powf(1.0 / years) - 1.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);
        let sharpe_ratio = compute_sharpe(equity_curve);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;

        for trade in trades {
            let pnl = trade.pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            }
        }

        let total_trades = trades.len();
        let win_rate = ratio_or_zero(trades_won as f64, total_trades as f64);

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_holding_days = ratio_or_zero(
            trades.iter().map(|t| t.holding_days as f64).sum(),
            total_trades as f64,
        );

        Metrics {
            starting_capital,
            final_equity,
            total_return,
            annualized_return,
            sharpe_ratio,
            max_drawdown,
            max_drawdown_duration,
            total_trades,
            trades_won,
            trades_lost,
            win_rate,
            profit_factor,
            avg_win: ratio_or_zero(total_wins, trades_won as f64),
            avg_loss: ratio_or_zero(total_losses, trades_lost as f64),
            largest_win,
            largest_loss,
            avg_holding_days,
            total_commission: trades.iter().map(|t| t.commission).sum(),
            total_tax: trades.iter().map(|t| t.tax).sum(),
            exit_reasons: exit_reason_stats(trades),
        }
    }
}

fn ratio_or_zero(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

/// Counts and mean return per exit reason, in a fixed reason order. Reasons
/// with no trades are omitted.
fn exit_reason_stats(trades: &[TradeRecord]) -> Vec<ExitReasonStats> {
    ExitReason::ALL
        .iter()
        .filter_map(|&reason| {
            let returns: Vec<f64> = trades
                .iter()
                .filter(|t| t.exit_reason == reason)
                .map(TradeRecord::return_pct)
                .collect();
            if returns.is_empty() {
                return None;
            }
            Some(ExitReasonStats {
                reason,
                count: returns.len(),
                avg_return: returns.iter().sum::<f64>() / returns.len() as f64,
            })
        })
        .collect()
}

/// Largest peak-to-trough decline as a fraction of the running peak, and
/// the longest run of days spent below a peak.
fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, i64) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0i64;
    let mut current_dd_duration = 0i64;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

/// Annualized mean over sample standard deviation of daily returns.
fn compute_sharpe(equity_curve: &[EquityPoint]) -> f64 {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev > 0.0 {
                (w[1].equity - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt();

    if stddev > 0.0 {
        mean / stddev * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}
