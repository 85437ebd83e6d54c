//! Performance Analyzer: pure functions over the recorded period history.
//!
//! Every metric is a pure function: NAV curve or return series in, scalar out.
//! `PerformanceReport::compute` is the only entry point that reads the
//! engine's `BacktestRun`.

use regimelab_core::engine::{BacktestRun, PeriodRecord, PeriodStatus};
use regimelab_core::stats::{mean, std_dev};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trading periods per year when none is configured.
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;

/// Per-regime return summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub periods: usize,
    pub mean_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub hit_rate: f64,
}

/// Aggregate performance metrics for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub periods: usize,
    pub periods_per_year: f64,
    pub initial_nav: f64,
    pub final_nav: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    pub hit_rate: f64,
    /// Mean Σ|Δw| per period.
    pub average_turnover: f64,
    /// Annualized cost as a fraction of NAV.
    pub cost_drag: f64,
    pub total_cost: f64,
    pub rebalanced_periods: usize,
    pub held_periods: usize,
    pub degraded_regime_periods: usize,
    /// Keyed by regime label; periods without a regime are omitted.
    pub by_regime: BTreeMap<String, RegimeStats>,
}

impl PerformanceReport {
    pub fn compute(run: &BacktestRun, periods_per_year: f64) -> Self {
        let history = &run.history;
        let returns = run.returns();
        let mut curve = Vec::with_capacity(history.len() + 1);
        curve.push(run.config.initial_nav);
        curve.extend(run.nav_curve());

        let max_dd = max_drawdown(&curve);
        let ann = annualized_return(&curve, periods_per_year);
        let cost_fractions: Vec<f64> = history.iter().map(PeriodRecord::cost_fraction).collect();

        Self {
            periods: history.len(),
            periods_per_year,
            initial_nav: run.config.initial_nav,
            final_nav: run.final_nav(),
            total_return: total_return(&curve),
            annualized_return: ann,
            annualized_volatility: std_dev(&returns) * periods_per_year.sqrt(),
            sharpe: sharpe_ratio(&returns, periods_per_year),
            sortino: sortino_ratio(&returns, periods_per_year),
            calmar: calmar_ratio(ann, max_dd),
            max_drawdown: max_dd,
            hit_rate: hit_rate(&returns),
            average_turnover: mean(&history.iter().map(|r| r.turnover).collect::<Vec<_>>()),
            cost_drag: mean(&cost_fractions) * periods_per_year,
            total_cost: history.iter().map(|r| r.cost).sum(),
            rebalanced_periods: history
                .iter()
                .filter(|r| r.status == PeriodStatus::Rebalanced)
                .count(),
            held_periods: run.held_periods(),
            degraded_regime_periods: history.iter().filter(|r| r.regime_degraded).count(),
            by_regime: by_regime(history, periods_per_year),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// (final − initial) / initial.
pub fn total_return(curve: &[f64]) -> f64 {
    match (curve.first(), curve.last()) {
        (Some(&first), Some(&last)) if curve.len() >= 2 && first > 0.0 => (last - first) / first,
        _ => 0.0,
    }
}

/// Geometric annualized return. `curve` includes the starting NAV, so it
/// spans `curve.len() - 1` periods.
pub fn annualized_return(curve: &[f64], periods_per_year: f64) -> f64 {
    let periods = curve.len().saturating_sub(1);
    if periods == 0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let growth = 1.0 + total_return(curve);
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(periods_per_year / periods as f64) - 1.0
}

/// mean / std · √periods_per_year. Zero with fewer than 2 returns or no
/// variance.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean(returns) / std * periods_per_year.sqrt()
}

/// Like Sharpe with downside deviation (negative returns, divided by the full
/// count) in the denominator.
pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside: f64 = returns
        .iter()
        .filter(|r| **r < 0.0)
        .map(|r| r * r)
        .sum::<f64>()
        / returns.len() as f64;
    let downside_std = downside.sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    mean(returns) / downside_std * periods_per_year.sqrt()
}

/// Annualized return / |max drawdown|. Zero without a drawdown or with a
/// non-positive return.
pub fn calmar_ratio(annualized: f64, max_dd: f64) -> f64 {
    if max_dd >= 0.0 || annualized <= 0.0 {
        return 0.0;
    }
    annualized / max_dd.abs()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &nav in curve {
        peak = peak.max(nav);
        if peak > 0.0 {
            max_dd = max_dd.min((nav - peak) / peak);
        }
    }
    max_dd
}

/// Fraction of periods with a strictly positive return.
pub fn hit_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
}

fn by_regime(history: &[PeriodRecord], periods_per_year: f64) -> BTreeMap<String, RegimeStats> {
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for record in history {
        if let Some(label) = record.regime {
            grouped
                .entry(label.to_string())
                .or_default()
                .push(record.net_return);
        }
    }
    grouped
        .into_iter()
        .map(|(label, returns)| {
            let avg = mean(&returns);
            let stats = RegimeStats {
                periods: returns.len(),
                mean_return: avg,
                annualized_return: (1.0 + avg).max(0.0).powf(periods_per_year) - 1.0,
                volatility: std_dev(&returns) * periods_per_year.sqrt(),
                hit_rate: hit_rate(&returns),
            };
            (label, stats)
        })
        .collect()
}
