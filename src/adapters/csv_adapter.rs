//! CSV import of raw series and CSV export of backtest reports.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::MarginError;
use crate::domain::metrics::Metrics;
use crate::domain::raw::{RawMarginRecord, RawPriceRecord};
use crate::domain::trade_date::{format_trade_date, parse_trade_date};
use crate::ports::report_port::ReportPort;
use chrono::NaiveDate;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Header-indexed view of one CSV row.
struct Row<'a> {
    source: &'a str,
    line: usize,
    headers: &'a csv::StringRecord,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    fn invalid(&self, reason: String) -> MarginError {
        MarginError::InvalidInput {
            source_name: self.source.to_string(),
            reason: format!("line {}: {}", self.line, reason),
        }
    }

    fn field(&self, name: &str) -> Result<&str, MarginError> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .and_then(|i| self.record.get(i))
            .map(str::trim)
            .ok_or_else(|| self.invalid(format!("missing {name} column")))
    }

    fn optional_field(&self, name: &str) -> Option<&str> {
        self.field(name).ok().filter(|v| !v.is_empty())
    }

    fn date(&self) -> Result<NaiveDate, MarginError> {
        let raw = self.field("date")?;
        parse_trade_date(raw).map_err(|e| self.invalid(e.to_string()))
    }

    fn ticker(&self) -> Result<String, MarginError> {
        let ticker = self.field("ticker")?;
        if ticker.is_empty() {
            return Err(self.invalid("empty ticker".into()));
        }
        Ok(ticker.to_string())
    }

    /// Thousands separators are accepted.
    fn number<T: std::str::FromStr>(&self, name: &str) -> Result<T, MarginError> {
        let raw = self.field(name)?;
        raw.replace(',', "")
            .parse::<T>()
            .map_err(|_| self.invalid(format!("invalid {name} value {raw:?}")))
    }
}

fn read_rows<R, T, F>(source: &str, reader: R, mut parse: F) -> Result<Vec<T>, MarginError>
where
    R: Read,
    F: FnMut(&Row<'_>) -> Result<T, MarginError>,
{
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| MarginError::InvalidInput {
            source_name: source.to_string(),
            reason: format!("CSV header error: {e}"),
        })?
        .clone();

    let mut out = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| MarginError::InvalidInput {
            source_name: source.to_string(),
            reason: format!("CSV parse error: {e}"),
        })?;
        let row = Row {
            source,
            line: i + 2,
            headers: &headers,
            record: &record,
        };
        out.push(parse(&row)?);
    }
    Ok(out)
}

/// Reads `date,ticker,open,high,low,close,volume` rows.
pub fn read_prices<R: Read>(source: &str, reader: R) -> Result<Vec<RawPriceRecord>, MarginError> {
    read_rows(source, reader, |row| {
        Ok(RawPriceRecord {
            date: row.date()?,
            ticker: row.ticker()?,
            open: row.number("open")?,
            high: row.number("high")?,
            low: row.number("low")?,
            close: row.number("close")?,
            volume: row.number("volume")?,
        })
    })
}

/// Reads `date,ticker,margin_balance_shares,prev_balance_shares,buy_shares,
/// sell_shares,cash_repay_shares` rows, with an optional
/// `margin_balance_amount` column.
pub fn read_margins<R: Read>(source: &str, reader: R) -> Result<Vec<RawMarginRecord>, MarginError> {
    read_rows(source, reader, |row| {
        let margin_balance_amount = match row.optional_field("margin_balance_amount") {
            Some(_) => Some(row.number::<f64>("margin_balance_amount")?),
            None => None,
        };
        Ok(RawMarginRecord {
            date: row.date()?,
            ticker: row.ticker()?,
            margin_balance_amount,
            margin_balance_shares: row.number("margin_balance_shares")?,
            prev_balance_shares: row.number("prev_balance_shares")?,
            buy_shares: row.number("buy_shares")?,
            sell_shares: row.number("sell_shares")?,
            cash_repay_shares: row.number("cash_repay_shares")?,
        })
    })
}

pub fn read_prices_file(path: &Path) -> Result<Vec<RawPriceRecord>, MarginError> {
    let file = fs::File::open(path)?;
    read_prices(&path.display().to_string(), file)
}

pub fn read_margins_file(path: &Path) -> Result<Vec<RawMarginRecord>, MarginError> {
    let file = fs::File::open(path)?;
    read_margins(&path.display().to_string(), file)
}

/// Writes `trades.csv`, `equity.csv` and `summary.csv` into a directory.
pub struct CsvReportAdapter;

fn csv_err(e: csv::Error) -> MarginError {
    MarginError::Io(std::io::Error::other(e))
}

impl CsvReportAdapter {
    fn write_trades(result: &BacktestResult, path: &Path) -> Result<(), MarginError> {
        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        wtr.write_record([
            "ticker",
            "signal_date",
            "entry_date",
            "entry_price",
            "exit_date",
            "exit_price",
            "exit_reason",
            "shares",
            "holding_days",
            "commission",
            "tax",
            "pnl",
            "return_pct",
        ])
        .map_err(csv_err)?;

        for t in result.trades() {
            wtr.write_record([
                t.ticker.clone(),
                format_trade_date(t.signal_date),
                format_trade_date(t.entry_date),
                format!("{:.2}", t.entry_price),
                format_trade_date(t.exit_date),
                format!("{:.2}", t.exit_price),
                t.exit_reason.to_string(),
                t.shares.to_string(),
                t.holding_days.to_string(),
                format!("{:.2}", t.commission),
                format!("{:.2}", t.tax),
                format!("{:.2}", t.pnl),
                format!("{:.4}", t.return_pct() * 100.0),
            ])
            .map_err(csv_err)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn write_equity(result: &BacktestResult, path: &Path) -> Result<(), MarginError> {
        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        wtr.write_record(["date", "equity", "cash", "open_positions"])
            .map_err(csv_err)?;
        for p in result.equity_curve() {
            wtr.write_record([
                format_trade_date(p.date),
                format!("{:.2}", p.equity),
                format!("{:.2}", p.cash),
                p.open_positions.to_string(),
            ])
            .map_err(csv_err)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn write_summary(result: &BacktestResult, metrics: &Metrics, path: &Path) -> Result<(), MarginError> {
        let mut rows: Vec<(String, String)> = vec![
            ("starting_capital".into(), format!("{:.2}", metrics.starting_capital)),
            ("final_equity".into(), format!("{:.2}", metrics.final_equity)),
            ("total_return_pct".into(), format!("{:.4}", metrics.total_return * 100.0)),
            ("annualized_return_pct".into(), format!("{:.4}", metrics.annualized_return * 100.0)),
            ("sharpe_ratio".into(), format!("{:.4}", metrics.sharpe_ratio)),
            ("max_drawdown_pct".into(), format!("{:.4}", metrics.max_drawdown * 100.0)),
            ("max_drawdown_days".into(), metrics.max_drawdown_duration.to_string()),
            ("trading_days".into(), result.trading_days.to_string()),
            ("signals".into(), result.signals_generated.to_string()),
            ("skipped_signals".into(), result.skipped_signals.len().to_string()),
            ("total_trades".into(), metrics.total_trades.to_string()),
            ("trades_won".into(), metrics.trades_won.to_string()),
            ("trades_lost".into(), metrics.trades_lost.to_string()),
            ("win_rate_pct".into(), format!("{:.2}", metrics.win_rate * 100.0)),
            ("profit_factor".into(), format!("{:.4}", metrics.profit_factor)),
            ("avg_win".into(), format!("{:.2}", metrics.avg_win)),
            ("avg_loss".into(), format!("{:.2}", metrics.avg_loss)),
            ("avg_holding_days".into(), format!("{:.2}", metrics.avg_holding_days)),
            ("total_commission".into(), format!("{:.2}", metrics.total_commission)),
            ("total_tax".into(), format!("{:.2}", metrics.total_tax)),
        ];
        for stats in &metrics.exit_reasons {
            rows.push((format!("exits_{}", stats.reason), stats.count.to_string()));
            rows.push((
                format!("exits_{}_avg_return_pct", stats.reason),
                format!("{:.4}", stats.avg_return * 100.0),
            ));
        }

        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        wtr.write_record(["metric", "value"]).map_err(csv_err)?;
        for (key, value) in rows {
            wtr.write_record([key, value]).map_err(csv_err)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, metrics: &Metrics, output_dir: &Path) -> Result<(), MarginError> {
        fs::create_dir_all(output_dir)?;
        Self::write_trades(result, &output_dir.join("trades.csv"))?;
        Self::write_equity(result, &output_dir.join("equity.csv"))?;
        Self::write_summary(result, metrics, &output_dir.join("summary.csv"))?;
        Ok(())
    }
}
