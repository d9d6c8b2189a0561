//! Core domain types and logic.

pub mod trade_date;
pub mod raw;
pub mod derived;
pub mod rolling;
pub mod signal;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod market_data;
pub mod backtest;
pub mod metrics;
pub mod config_validation;
pub mod error;
