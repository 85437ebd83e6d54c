//! Engine configuration, mutable state, and run result types.

use super::cost_model::CostModel;
use super::history::PeriodRecord;
use crate::domain::{gross_exposure, WeightMap};
use crate::portfolio::Constraints;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Configuration for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_nav: f64,
    pub cost_model: CostModel,
    /// Request targets every k-th period; other periods only roll.
    pub rebalance_every: usize,
    /// Per-name trades smaller than this (in weight) are skipped.
    pub min_trade_weight: f64,
    /// Hard limits the traded book must satisfy when small trades are
    /// skipped. Without them the target's own gross, cap and sign bound the
    /// book.
    #[serde(default)]
    pub constraints: Option<Constraints>,
}

impl EngineConfig {
    pub fn new(initial_nav: f64) -> Self {
        Self {
            initial_nav,
            cost_model: CostModel::frictionless(),
            rebalance_every: 1,
            min_trade_weight: 0.0,
            constraints: None,
        }
    }

    /// Create a config with an explicit cost model.
    pub fn with_costs(initial_nav: f64, cost_model: CostModel) -> Self {
        Self {
            cost_model,
            ..Self::new(initial_nav)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.initial_nav > 0.0 && self.initial_nav.is_finite()) {
            return Err(format!("initial_nav must be > 0, got {}", self.initial_nav));
        }
        if self.rebalance_every == 0 {
            return Err("rebalance_every must be >= 1".into());
        }
        if !(self.min_trade_weight >= 0.0) {
            return Err(format!(
                "min_trade_weight must be >= 0, got {}",
                self.min_trade_weight
            ));
        }
        if let Some(c) = &self.constraints {
            c.validate()?;
        }
        self.cost_model.validate()
    }
}

/// Mutable state that evolves period-by-period. Mutated only by
/// `BacktestEngine::step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestState {
    pub holdings: WeightMap,
    pub nav: f64,
    pub cumulative_turnover: f64,
    pub cumulative_cost: f64,
    pub last_period: Option<usize>,
    pub last_date: Option<NaiveDate>,
    pub periods_processed: usize,
}

impl BacktestState {
    pub fn new(initial_nav: f64) -> Self {
        Self {
            holdings: WeightMap::new(),
            nav: initial_nav,
            cumulative_turnover: 0.0,
            cumulative_cost: 0.0,
            last_period: None,
            last_date: None,
            periods_processed: 0,
        }
    }

    pub fn gross_exposure(&self) -> f64 {
        gross_exposure(&self.holdings)
    }
}

/// Result of a complete backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub config: EngineConfig,
    pub history: Vec<PeriodRecord>,
    pub final_state: BacktestState,
}

impl BacktestRun {
    pub fn final_nav(&self) -> f64 {
        self.final_state.nav
    }

    /// NAV after each period.
    pub fn nav_curve(&self) -> Vec<f64> {
        self.history.iter().map(|r| r.nav).collect()
    }

    /// Net return per period.
    pub fn returns(&self) -> Vec<f64> {
        self.history.iter().map(|r| r.net_return).collect()
    }

    pub fn held_periods(&self) -> usize {
        self.history.iter().filter(|r| r.status.is_held()).count()
    }
}
