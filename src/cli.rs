//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::{CsvReportAdapter, read_margins_file, read_prices_file};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{BacktestConfig, BacktestResult, run_backtest};
use crate::domain::config_validation::{backtest_config, rolling_params, signal_params};
use crate::domain::error::MarginError;
use crate::domain::metrics::Metrics;
use crate::domain::rolling::{ComputeMode, ComputeRange, ComputeReport, RollingEngine};
use crate::domain::signal::{SignalParams, breakdown, rank_signals};
use crate::domain::trade_date::{format_trade_date, parse_trade_date};
use crate::ports::derived_port::DerivedPort;
use crate::ports::raw_data_port::RawDataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(
    name = "twmargin",
    about = "Margin maintenance ratio metrics and backtester for Taiwan equities"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the store tables
    InitDb {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Load raw price and/or margin CSV files into the store
    Import {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        prices: Option<PathBuf>,
        #[arg(long)]
        margins: Option<PathBuf>,
    },
    /// Compute derived metrics for a date range
    Compute {
        #[arg(short, long)]
        config: PathBuf,
        /// First trade date, YYYYMMDD
        #[arg(long)]
        start: String,
        /// Last trade date, YYYYMMDD (defaults to --start)
        #[arg(long)]
        end: Option<String>,
        /// Restrict to these tickers (repeatable)
        #[arg(long = "ticker")]
        tickers: Vec<String>,
        /// Recompute and overwrite existing rows
        #[arg(long)]
        force: bool,
    },
    /// List entry signals for one trade date
    Signals {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        date: String,
        /// Print the condition breakdown for every ticker
        #[arg(long)]
        all: bool,
    },
    /// Run a backtest over the derived table
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory for trades.csv, equity.csv and summary.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Validate the configuration and stop
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete derived rows so the next incremental run recomputes them
    Purge {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        ticker: Option<String>,
    },
    /// Show raw and derived coverage for a ticker
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        ticker: String,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn execute(cli: Cli) -> Result<(), MarginError> {
    match cli.command {
        Command::Backtest {
            config,
            dry_run: true,
            ..
        } => run_dry_run(&config),
        command => dispatch(command),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, MarginError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

/// Load the config and open the store it names, creating missing tables.
#[cfg(feature = "sqlite")]
fn open(
    path: &Path,
) -> Result<(FileConfigAdapter, crate::adapters::sqlite_adapter::SqliteAdapter), MarginError> {
    let config = load_config(path)?;
    let store = crate::adapters::sqlite_adapter::SqliteAdapter::from_config(&config)?;
    store.initialize_schema()?;
    Ok((config, store))
}

#[cfg(feature = "sqlite")]
fn dispatch(command: Command) -> Result<(), MarginError> {
    use crate::ports::config_port::ConfigPort;

    match command {
        Command::InitDb { config } => {
            let (config, _store) = open(&config)?;
            let path = config.get_string("sqlite", "path").unwrap_or_default();
            println!("Initialized store at {path}");
            Ok(())
        }
        Command::Import {
            config,
            prices,
            margins,
        } => {
            let (_config, store) = open(&config)?;
            run_import(&store, prices.as_deref(), margins.as_deref())
        }
        Command::Compute {
            config,
            start,
            end,
            tickers,
            force,
        } => {
            let (config, store) = open(&config)?;
            let params = rolling_params(&config)?;
            let start = parse_trade_date(&start)?;
            let end = match end {
                Some(end) => parse_trade_date(&end)?,
                None => start,
            };
            let range = ComputeRange::Span {
                start,
                end,
                tickers: (!tickers.is_empty()).then_some(tickers),
            };
            let mode = if force {
                ComputeMode::Force
            } else {
                ComputeMode::Incremental
            };
            let report = RollingEngine::new(&store, &store, params).compute(&range, mode)?;
            print_compute_report(&report);
            Ok(())
        }
        Command::Signals { config, date, all } => {
            let (config, store) = open(&config)?;
            let params = signal_params(&config)?;
            let date = parse_trade_date(&date)?;
            run_signals(&store, &params, date, all)
        }
        Command::Backtest { config, output, .. } => {
            let (config, store) = open(&config)?;
            let params = signal_params(&config)?;
            let bt_config = backtest_config(&config)?;
            let output = output.unwrap_or_else(|| PathBuf::from("report"));
            run_backtest_pipeline(&store, &bt_config, &params, &CsvReportAdapter, &output)
        }
        Command::Purge {
            config,
            start,
            end,
            ticker,
        } => {
            let (_config, store) = open(&config)?;
            let start = parse_trade_date(&start)?;
            let end = parse_trade_date(&end)?;
            let deleted = store.delete_derived(ticker.as_deref(), start, end)?;
            println!(
                "Deleted {} derived rows between {} and {}{}",
                deleted,
                format_trade_date(start),
                format_trade_date(end),
                ticker.map(|t| format!(" for {t}")).unwrap_or_default()
            );
            Ok(())
        }
        Command::Info { config, ticker } => {
            let (_config, store) = open(&config)?;
            let describe = |label: &str, range: Option<(chrono::NaiveDate, chrono::NaiveDate, usize)>| {
                match range {
                    Some((first, last, count)) => println!(
                        "{ticker} {label}: {count} rows, {} to {}",
                        format_trade_date(first),
                        format_trade_date(last)
                    ),
                    None => println!("{ticker} {label}: no data"),
                }
            };
            describe("prices", store.price_range(&ticker)?);
            describe("margins", store.margin_range(&ticker)?);
            describe("derived", store.derived_range(&ticker)?);
            Ok(())
        }
    }
}

#[cfg(not(feature = "sqlite"))]
fn dispatch(_command: Command) -> Result<(), MarginError> {
    Err(MarginError::Database {
        reason: "twmargin was built without the sqlite feature".into(),
    })
}

/// Validate every config section without touching the store.
pub fn run_dry_run(config_path: &Path) -> Result<(), MarginError> {
    let config = load_config(config_path)?;
    let rolling = rolling_params(&config)?;
    let signal = signal_params(&config)?;
    let bt = backtest_config(&config)?;

    eprintln!("Config validated successfully");
    eprintln!("\nMetrics:");
    eprintln!("  loan ratio:      {}", rolling.loan_ratio);
    eprintln!(
        "  windows:         ratio {} / volume {} / balance {} ({:?})",
        rolling.ratio_window, rolling.volume_window, rolling.balance_window, rolling.window_policy
    );
    eprintln!("  balance factor:  {}", rolling.balance_factor);
    eprintln!("\nSignal:");
    eprintln!("  volume:          {} average", signal.volume_comparison);
    eprintln!("  top_n:           {}", signal.top_n);
    eprintln!("\nBacktest:");
    eprintln!(
        "  range:           {} to {}",
        format_trade_date(bt.start_date),
        format_trade_date(bt.end_date)
    );
    eprintln!("  capital:         {:.0}", bt.starting_capital);
    eprintln!("  position:        {:.1}% of cash", bt.position_fraction * 100.0);
    eprintln!(
        "  exits:           TP {:.1}%{} / SL {:.1}%{} / {} days",
        bt.take_profit * 100.0,
        if bt.enable_take_profit { "" } else { " (off)" },
        bt.stop_loss * 100.0,
        if bt.enable_stop_loss { "" } else { " (off)" },
        bt.max_holding_days
    );
    eprintln!("\nDry run complete: configuration is valid");
    Ok(())
}

pub fn run_import(
    store: &dyn RawDataPort,
    prices: Option<&Path>,
    margins: Option<&Path>,
) -> Result<(), MarginError> {
    if prices.is_none() && margins.is_none() {
        return Err(MarginError::InvalidInput {
            source_name: "import".into(),
            reason: "nothing to import: pass --prices and/or --margins".into(),
        });
    }
    if let Some(path) = prices {
        let records = read_prices_file(path)?;
        let stored = store.store_prices(&records)?;
        println!("Imported {} price rows from {}", stored, path.display());
    }
    if let Some(path) = margins {
        let records = read_margins_file(path)?;
        let stored = store.store_margins(&records)?;
        println!("Imported {} margin rows from {}", stored, path.display());
    }
    Ok(())
}

fn print_compute_report(report: &ComputeReport) {
    println!(
        "Computed {} rows across {} tickers ({} already present, {} not found)",
        report.computed,
        report.tickers,
        report.skipped_existing,
        report.not_found.len()
    );
    for nf in &report.not_found {
        eprintln!("  not found: {} (missing {:?})", nf.key, nf.missing);
    }
}

pub fn run_signals(
    store: &dyn DerivedPort,
    params: &SignalParams,
    date: chrono::NaiveDate,
    all: bool,
) -> Result<(), MarginError> {
    let day = store.fetch_derived(None, date, date)?;
    if day.is_empty() {
        return Err(MarginError::NoData {
            what: "derived records".into(),
            start: format_trade_date(date),
            end: format_trade_date(date),
        });
    }

    let refs: Vec<_> = day.iter().collect();
    let ranked = rank_signals(&refs, params);

    println!("rank,ticker,margin_ratio,avg_10day_ratio,drop_pct,volume,avg_10day_volume,balance");
    for s in &ranked {
        let r = s.record;
        println!(
            "{},{},{:.2},{:.2},{:.2},{},{:.0},{}",
            s.rank,
            r.ticker,
            r.margin_ratio.unwrap_or_default(),
            r.avg_10day_ratio.unwrap_or_default(),
            s.drop_pct,
            r.volume,
            r.avg_10day_volume.unwrap_or_default(),
            r.margin_balance_shares
        );
    }
    eprintln!(
        "{}: {} signals from {} tickers",
        format_trade_date(date),
        ranked.len(),
        day.len()
    );

    if all {
        eprintln!("\nticker  ratio<avg  volume  red  balance");
        for r in &day {
            let b = breakdown(r, params);
            eprintln!(
                "{:<7} {:<10} {:<7} {:<4} {}",
                r.ticker, b.ratio_below_average, b.volume_filter, b.red_candle, b.balance_held
            );
        }
    }
    Ok(())
}

pub fn run_backtest_pipeline(
    store: &dyn DerivedPort,
    bt_config: &BacktestConfig,
    params: &SignalParams,
    reporter: &dyn ReportPort,
    output: &Path,
) -> Result<(), MarginError> {
    let records = store.fetch_derived(None, bt_config.start_date, bt_config.end_date)?;
    eprintln!(
        "Running backtest: {} derived rows, {} to {}",
        records.len(),
        format_trade_date(bt_config.start_date),
        format_trade_date(bt_config.end_date)
    );

    let result = run_backtest(&records, bt_config, params)?;
    let metrics = Metrics::compute(&result.portfolio);
    print_summary(&result, &metrics);

    reporter.write(&result, &metrics, output)?;
    eprintln!("\nReport written to: {}", output.display());
    Ok(())
}

fn print_summary(result: &BacktestResult, metrics: &Metrics) {
    eprintln!("\n=== Results ===");
    eprintln!("Trading Days:     {}", result.trading_days);
    eprintln!("Final Equity:     {:.0}", metrics.final_equity);
    eprintln!("Total Return:     {:.2}%", metrics.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", metrics.annualized_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", metrics.max_drawdown * 100.0);
    eprintln!("Signals:          {}", result.signals_generated);
    eprintln!("Skipped:          {}", result.skipped_signals.len());
    eprintln!("Total Trades:     {}", metrics.total_trades);
    eprintln!("Win Rate:         {:.1}%", metrics.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", metrics.profit_factor);

    if !metrics.exit_reasons.is_empty() {
        eprintln!("\n=== Exits ===");
        for stats in &metrics.exit_reasons {
            eprintln!(
                "  {:<16} {:>4} trades, avg {:+.2}%",
                stats.reason.as_str(),
                stats.count,
                stats.avg_return * 100.0
            );
        }
    }
}
