//! twmargin: margin maintenance ratio pipeline and backtester for
//! Taiwan-listed equities.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
