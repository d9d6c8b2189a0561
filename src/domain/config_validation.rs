//! Configuration validation.
//!
//! Builds validated parameter structs from a [`ConfigPort`] before any
//! command touches the database. Absent keys take their defaults; present
//! but malformed or out-of-range values are errors.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::MarginError;
use crate::domain::execution::FeeSchedule;
use crate::domain::rolling::{RollingParams, WindowPolicy};
use crate::domain::signal::{SignalParams, VolumeComparison};
use crate::domain::trade_date::parse_trade_date;
use crate::ports::config_port::{ConfigPort, parse_bool, parse_fraction};
use chrono::NaiveDate;
use std::str::FromStr;

pub fn rolling_params(config: &dyn ConfigPort) -> Result<RollingParams, MarginError> {
    let defaults = RollingParams::default();
    let params = RollingParams {
        loan_ratio: read_fraction(config, "metrics", "loan_ratio", defaults.loan_ratio)?,
        ratio_window: read_window(config, "ratio_window", defaults.ratio_window)?,
        volume_window: read_window(config, "volume_window", defaults.volume_window)?,
        balance_window: read_window(config, "balance_window", defaults.balance_window)?,
        balance_factor: read_fraction(config, "metrics", "balance_factor", defaults.balance_factor)?,
        window_policy: read_parsed::<WindowPolicy>(
            config,
            "metrics",
            "window_policy",
            defaults.window_policy,
        )?,
    };

    if params.loan_ratio <= 0.0 || params.loan_ratio > 1.0 {
        return Err(MarginError::config_invalid(
            "metrics",
            "loan_ratio",
            "loan_ratio must be in (0, 1]",
        ));
    }
    if params.balance_factor <= 0.0 {
        return Err(MarginError::config_invalid(
            "metrics",
            "balance_factor",
            "balance_factor must be positive",
        ));
    }
    Ok(params)
}

pub fn signal_params(config: &dyn ConfigPort) -> Result<SignalParams, MarginError> {
    let defaults = SignalParams::default();
    let top_n = read_int(config, "signal", "top_n", defaults.top_n as i64)?;
    if top_n < 0 {
        return Err(MarginError::config_invalid(
            "signal",
            "top_n",
            "top_n must be non-negative (0 disables ranking)",
        ));
    }
    Ok(SignalParams {
        volume_comparison: read_parsed::<VolumeComparison>(
            config,
            "signal",
            "volume_comparison",
            defaults.volume_comparison,
        )?,
        top_n: top_n as usize,
    })
}

pub fn backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, MarginError> {
    let start_date = read_date(config, "start_date")?;
    let end_date = read_date(config, "end_date")?;
    if start_date > end_date {
        return Err(MarginError::config_invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date",
        ));
    }

    let d = BacktestConfig::new(start_date, end_date);
    let section = "backtest";
    let max_holding_days = read_int(config, section, "max_holding_days", d.max_holding_days as i64)?;
    let board_lot = read_int(config, section, "board_lot", d.board_lot)?;

    let base_fees = read_fee_schedule(config, section)?;

    let cfg = BacktestConfig {
        start_date,
        end_date,
        starting_capital: read_f64(config, section, "starting_capital", d.starting_capital)?,
        position_fraction: read_fraction(config, section, "position_fraction", d.position_fraction)?,
        take_profit: read_fraction(config, section, "take_profit", d.take_profit)?,
        stop_loss: read_fraction(config, section, "stop_loss", d.stop_loss)?,
        max_holding_days: usize::try_from(max_holding_days).unwrap_or(0),
        enable_take_profit: read_bool(config, section, "enable_take_profit", d.enable_take_profit)?,
        enable_stop_loss: read_bool(config, section, "enable_stop_loss", d.enable_stop_loss)?,
        board_lot,
        fees: FeeSchedule {
            commission_rate: read_fraction(config, section, "commission_rate", base_fees.commission_rate)?,
            commission_min_board_lot: read_f64(
                config,
                section,
                "commission_min_board_lot",
                base_fees.commission_min_board_lot,
            )?,
            commission_min_odd_lot: read_f64(
                config,
                section,
                "commission_min_odd_lot",
                base_fees.commission_min_odd_lot,
            )?,
            sell_tax_rate: read_fraction(config, section, "sell_tax_rate", base_fees.sell_tax_rate)?,
        },
    };

    if cfg.starting_capital <= 0.0 {
        return Err(MarginError::config_invalid(
            section,
            "starting_capital",
            "starting_capital must be positive",
        ));
    }
    if cfg.position_fraction <= 0.0 || cfg.position_fraction > 1.0 {
        return Err(MarginError::config_invalid(
            section,
            "position_fraction",
            "position_fraction must be in (0, 1]",
        ));
    }
    if cfg.take_profit <= 0.0 {
        return Err(MarginError::config_invalid(
            section,
            "take_profit",
            "take_profit must be positive",
        ));
    }
    if cfg.stop_loss <= 0.0 || cfg.stop_loss >= 1.0 {
        return Err(MarginError::config_invalid(
            section,
            "stop_loss",
            "stop_loss must be in (0, 1)",
        ));
    }
    if max_holding_days < 1 {
        return Err(MarginError::config_invalid(
            section,
            "max_holding_days",
            "max_holding_days must be at least 1",
        ));
    }
    if board_lot < 1 {
        return Err(MarginError::config_invalid(
            section,
            "board_lot",
            "board_lot must be at least 1",
        ));
    }
    for (key, value) in [
        ("commission_rate", cfg.fees.commission_rate),
        ("commission_min_board_lot", cfg.fees.commission_min_board_lot),
        ("commission_min_odd_lot", cfg.fees.commission_min_odd_lot),
        ("sell_tax_rate", cfg.fees.sell_tax_rate),
    ] {
        if value < 0.0 {
            return Err(MarginError::config_invalid(
                section,
                key,
                format!("{key} must be non-negative"),
            ));
        }
    }
    Ok(cfg)
}

fn read_window(config: &dyn ConfigPort, key: &str, default: usize) -> Result<usize, MarginError> {
    let value = read_int(config, "metrics", key, default as i64)?;
    if value < 1 {
        return Err(MarginError::config_invalid(
            "metrics",
            key,
            format!("{key} must be at least 1"),
        ));
    }
    Ok(value as usize)
}

fn read_date(config: &dyn ConfigPort, key: &str) -> Result<NaiveDate, MarginError> {
    let raw = config
        .get_string("backtest", key)
        .ok_or_else(|| MarginError::config_missing("backtest", key))?;
    parse_trade_date(raw.trim()).map_err(|_| {
        MarginError::config_invalid("backtest", key, format!("{raw:?} is not a YYYYMMDD date"))
    })
}

/// Starting point for the individual fee keys: `none` (frictionless, the
/// default) or `taiwan` (retail brokerage commission and securities tax).
fn read_fee_schedule(config: &dyn ConfigPort, section: &str) -> Result<FeeSchedule, MarginError> {
    let raw = config.get_string(section, "fee_schedule");
    match raw.as_deref().map(|v| v.trim().to_lowercase()).as_deref() {
        None | Some("none") => Ok(FeeSchedule::default()),
        Some("taiwan") => Ok(FeeSchedule::taiwan_retail()),
        Some(other) => Err(MarginError::config_invalid(
            section,
            "fee_schedule",
            format!("unknown fee schedule {other:?} (expected none or taiwan)"),
        )),
    }
}

fn read_bool(config: &dyn ConfigPort, section: &str, key: &str, default: bool) -> Result<bool, MarginError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => parse_bool(&raw).ok_or_else(|| {
            MarginError::config_invalid(section, key, format!("{raw:?} is not true or false"))
        }),
    }
}

fn read_int(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<i64, MarginError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| MarginError::config_invalid(section, key, format!("{raw:?} is not an integer"))),
    }
}

fn read_f64(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64, MarginError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| MarginError::config_invalid(section, key, format!("{raw:?} is not a number"))),
    }
}

fn read_fraction(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64, MarginError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => parse_fraction(&raw).ok_or_else(|| {
            MarginError::config_invalid(section, key, format!("{raw:?} is not a number or percentage"))
        }),
    }
}

fn read_parsed<T>(config: &dyn ConfigPort, section: &str, key: &str, default: T) -> Result<T, MarginError>
where
    T: FromStr<Err = String>,
{
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|reason| MarginError::config_invalid(section, key, reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn invalid_key(err: MarginError) -> String {
        match err {
            MarginError::ConfigInvalid { key, .. } => key,
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn empty_metrics_section_uses_defaults() {
        let config = make_config("[metrics]\n");
        assert_eq!(rolling_params(&config).unwrap(), RollingParams::default());
    }

    #[test]
    fn metrics_overrides() {
        let config = make_config(
            r#"
[metrics]
loan_ratio = 60%
ratio_window = 20
volume_window = 5
balance_window = 3
balance_factor = 0.9
window_policy = strict
"#,
        );
        let params = rolling_params(&config).unwrap();
        assert!((params.loan_ratio - 0.6).abs() < 1e-12);
        assert_eq!(params.ratio_window, 20);
        assert_eq!(params.volume_window, 5);
        assert_eq!(params.balance_window, 3);
        assert!((params.balance_factor - 0.9).abs() < 1e-12);
        assert_eq!(params.window_policy, WindowPolicy::Strict);
    }

    #[test]
    fn zero_window_fails() {
        let config = make_config("[metrics]\nratio_window = 0\n");
        assert_eq!(invalid_key(rolling_params(&config).unwrap_err()), "ratio_window");
    }

    #[test]
    fn unknown_window_policy_fails() {
        let config = make_config("[metrics]\nwindow_policy = loose\n");
        assert_eq!(invalid_key(rolling_params(&config).unwrap_err()), "window_policy");
    }

    #[test]
    fn loan_ratio_out_of_range_fails() {
        let config = make_config("[metrics]\nloan_ratio = 1.5\n");
        assert_eq!(invalid_key(rolling_params(&config).unwrap_err()), "loan_ratio");
    }

    #[test]
    fn signal_section() {
        let config = make_config("[signal]\nvolume_comparison = below\ntop_n = 10\n");
        let params = signal_params(&config).unwrap();
        assert_eq!(params.volume_comparison, VolumeComparison::Below);
        assert_eq!(params.top_n, 10);

        let config = make_config("[signal]\ntop_n = -1\n");
        assert_eq!(invalid_key(signal_params(&config).unwrap_err()), "top_n");
    }

    #[test]
    fn valid_backtest_config_passes() {
        let config = make_config(
            r#"
[backtest]
start_date = 20240101
end_date = 20241231
starting_capital = 500000
position_fraction = 10%
take_profit = 0.4
stop_loss = 10%
max_holding_days = 20
enable_stop_loss = false
commission_rate = 0.1425%
commission_min_board_lot = 20
commission_min_odd_lot = 1
sell_tax_rate = 0.3%
"#,
        );
        let cfg = backtest_config(&config).unwrap();
        assert_eq!(cfg.start_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(cfg.end_date, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert!((cfg.starting_capital - 500_000.0).abs() < f64::EPSILON);
        assert!((cfg.position_fraction - 0.1).abs() < 1e-12);
        assert!((cfg.stop_loss - 0.1).abs() < 1e-12);
        assert_eq!(cfg.max_holding_days, 20);
        assert!(cfg.enable_take_profit);
        assert!(!cfg.enable_stop_loss);
        assert_eq!(cfg.board_lot, 1000);
        assert!((cfg.fees.commission_rate - 0.001425).abs() < 1e-12);
        assert!((cfg.fees.sell_tax_rate - 0.003).abs() < 1e-12);
    }

    #[test]
    fn toggles_accept_bool_words() {
        let config = make_config(
            "[backtest]\nstart_date = 20240101\nend_date = 20241231\nenable_take_profit = off\nenable_stop_loss = yes\n",
        );
        let cfg = backtest_config(&config).unwrap();
        assert!(!cfg.enable_take_profit);
        assert!(cfg.enable_stop_loss);
    }

    #[test]
    fn taiwan_fee_schedule_with_override() {
        let config = make_config(
            "[backtest]\nstart_date = 20240101\nend_date = 20241231\nfee_schedule = Taiwan\nsell_tax_rate = 0.15%\n",
        );
        let fees = backtest_config(&config).unwrap().fees;
        assert!((fees.commission_rate - 0.001425).abs() < 1e-12);
        assert!((fees.commission_min_board_lot - 20.0).abs() < f64::EPSILON);
        assert!((fees.commission_min_odd_lot - 1.0).abs() < f64::EPSILON);
        assert!((fees.sell_tax_rate - 0.0015).abs() < 1e-12);
    }

    #[test]
    fn fees_default_to_zero() {
        let config = make_config("[backtest]\nstart_date = 20240101\nend_date = 20241231\n");
        assert_eq!(backtest_config(&config).unwrap().fees, FeeSchedule::default());
    }

    #[test]
    fn missing_dates_fail() {
        let config = make_config("[backtest]\nstart_date = 20240101\n");
        match backtest_config(&config).unwrap_err() {
            MarginError::ConfigMissing { key, .. } => assert_eq!(key, "end_date"),
            other => panic!("expected ConfigMissing, got {other:?}"),
        }
    }

    #[test]
    fn dashed_date_fails() {
        let config = make_config("[backtest]\nstart_date = 2024-01-01\nend_date = 20241231\n");
        assert_eq!(invalid_key(backtest_config(&config).unwrap_err()), "start_date");
    }

    #[test]
    fn start_after_end_fails() {
        let config = make_config("[backtest]\nstart_date = 20241231\nend_date = 20240101\n");
        assert_eq!(invalid_key(backtest_config(&config).unwrap_err()), "start_date");
    }

    #[test]
    fn out_of_range_values_fail() {
        let base = "[backtest]\nstart_date = 20240101\nend_date = 20241231\n";
        for (line, key) in [
            ("starting_capital = 0", "starting_capital"),
            ("position_fraction = 1.5", "position_fraction"),
            ("stop_loss = 0", "stop_loss"),
            ("take_profit = -0.1", "take_profit"),
            ("max_holding_days = 0", "max_holding_days"),
            ("board_lot = 0", "board_lot"),
            ("sell_tax_rate = -0.1", "sell_tax_rate"),
            ("starting_capital = lots", "starting_capital"),
            ("enable_take_profit = flase", "enable_take_profit"),
            ("enable_stop_loss = maybe", "enable_stop_loss"),
            ("fee_schedule = nyse", "fee_schedule"),
        ] {
            let config = make_config(&format!("{base}{line}\n"));
            assert_eq!(invalid_key(backtest_config(&config).unwrap_err()), key, "{line}");
        }
    }
}
