//! Entry signal evaluation on a single derived record.
//!
//! Four conditions, all required:
//! 1. margin ratio below its trailing average
//! 2. day volume compared with its trailing average (operator configurable)
//! 3. red candle (close above open)
//! 4. margin balance above the scaled trailing balance average

use crate::domain::derived::DerivedRecord;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Direction of the volume filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeComparison {
    /// volume > average volume
    Above,
    /// volume < average volume
    Below,
}

impl VolumeComparison {
    pub fn holds(self, volume: f64, average: f64) -> bool {
        match self {
            VolumeComparison::Above => volume > average,
            VolumeComparison::Below => volume < average,
        }
    }
}

impl FromStr for VolumeComparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "above" | ">" => Ok(VolumeComparison::Above),
            "below" | "<" => Ok(VolumeComparison::Below),
            other => Err(format!("unknown volume comparison {other:?} (expected above or below)")),
        }
    }
}

impl fmt::Display for VolumeComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeComparison::Above => write!(f, "above"),
            VolumeComparison::Below => write!(f, "below"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalParams {
    pub volume_comparison: VolumeComparison,
    /// Cap on ratio-drop candidates checked per day; 0 disables the cap.
    pub top_n: usize,
}

impl Default for SignalParams {
    fn default() -> Self {
        SignalParams {
            volume_comparison: VolumeComparison::Above,
            top_n: 0,
        }
    }
}

/// Per-condition outcome. A condition with an absent input is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalBreakdown {
    pub ratio_below_average: bool,
    pub volume_filter: bool,
    pub red_candle: bool,
    pub balance_held: bool,
}

impl SignalBreakdown {
    pub fn is_entry(&self) -> bool {
        self.ratio_below_average && self.volume_filter && self.red_candle && self.balance_held
    }
}

pub fn breakdown(record: &DerivedRecord, params: &SignalParams) -> SignalBreakdown {
    let ratio_below_average = matches!(
        (record.margin_ratio, record.avg_10day_ratio),
        (Some(ratio), Some(avg)) if ratio < avg
    );
    let volume_filter = record
        .avg_10day_volume
        .is_some_and(|avg| params.volume_comparison.holds(record.volume as f64, avg));
    let balance_held = record.margin_balance_shares > 0
        && record
            .avg_5day_balance_x095
            .is_some_and(|threshold| record.margin_balance_shares as f64 > threshold);

    SignalBreakdown {
        ratio_below_average,
        volume_filter,
        red_candle: record.is_red_candle(),
        balance_held,
    }
}

pub fn is_entry_signal(record: &DerivedRecord, params: &SignalParams) -> bool {
    breakdown(record, params).is_entry()
}

/// A record that passed every condition, with its place in the day's order.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSignal<'a> {
    pub rank: usize,
    pub drop_pct: f64,
    pub record: &'a DerivedRecord,
}

/// Select one day's entry signals in execution order.
///
/// Records whose ratio sits below its average are ordered by drop
/// percentage (deepest first, ties by ticker). When `top_n` is set only
/// that many candidates go on to the remaining filters.
pub fn rank_signals<'a>(day: &[&'a DerivedRecord], params: &SignalParams) -> Vec<RankedSignal<'a>> {
    let mut candidates: Vec<(f64, &'a DerivedRecord)> = day
        .iter()
        .filter_map(|r| {
            let drop = r.ratio_drop_pct()?;
            breakdown(r, params).ratio_below_average.then_some((drop, *r))
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.ticker.cmp(&b.1.ticker))
    });

    if params.top_n > 0 {
        candidates.truncate(params.top_n);
    }

    candidates
        .into_iter()
        .filter(|(_, r)| is_entry_signal(r, params))
        .enumerate()
        .map(|(i, (drop_pct, record))| RankedSignal {
            rank: i + 1,
            drop_pct,
            record,
        })
        .collect()
}
