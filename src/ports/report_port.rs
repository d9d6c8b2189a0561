//! Report generation port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::MarginError;
use crate::domain::metrics::Metrics;
use std::path::Path;

/// Port for writing backtest artifacts (ledger, equity curve, summary).
pub trait ReportPort {
    fn write(
        &self,
        result: &BacktestResult,
        metrics: &Metrics,
        output_dir: &Path,
    ) -> Result<(), MarginError>;
}
