//! Per-period history records.

use crate::domain::{Symbol, WeightMap};
use crate::regime::RegimeLabel;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// What happened to the book in a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodStatus {
    /// Target weights were requested and traded toward.
    Rebalanced,
    /// Not a rebalance period; holdings only rolled.
    NotScheduled,
    /// A rebalance was requested but failed recoverably; rolled holdings kept.
    Held { reason: String },
}

impl PeriodStatus {
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Rebalanced => "rebalanced",
            Self::NotScheduled => "not_scheduled",
            Self::Held { .. } => "held",
        }
    }
}

/// One row of the backtest history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub period: usize,
    pub date: NaiveDate,
    /// NAV before rolling.
    pub nav_start: f64,
    /// NAV after rolling and costs.
    pub nav: f64,
    /// Portfolio return from price moves alone.
    pub gross_return: f64,
    /// `nav / nav_start - 1`.
    pub net_return: f64,
    pub cost: f64,
    /// Σ|weights − rolled_weights|.
    pub turnover: f64,
    /// Holdings after rolling, before trading.
    pub rolled_weights: WeightMap,
    /// Holdings after trading.
    pub weights: WeightMap,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub regime: Option<RegimeLabel>,
    pub regime_degraded: bool,
    pub status: PeriodStatus,
    /// Eligible instruments left out of the forecast set.
    pub excluded_instruments: Vec<Symbol>,
}

impl PeriodRecord {
    /// Cost as a fraction of the rolled NAV.
    pub fn cost_fraction(&self) -> f64 {
        let rolled_nav = self.nav + self.cost;
        if rolled_nav > 0.0 {
            self.cost / rolled_nav
        } else {
            0.0
        }
    }
}
