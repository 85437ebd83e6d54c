//! Cost model: proportional friction plus optional superlinear market impact.
//!
//! Costs are charged on traded weight: for a trade of `Δw` (fraction of NAV)
//! the cost is `NAV · (c·|Δw| + k·|Δw|^(1+α))`, with
//! `c = (commission_bps + slippage_bps) / 10_000`, `k = impact_coefficient`
//! and `α = impact_exponent`.

use crate::domain::WeightMap;
use serde::{Deserialize, Serialize};

/// Named cost levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPreset {
    #[default]
    Frictionless,
    Realistic,
    Hostile,
}

impl CostPreset {
    pub fn slippage_bps(self) -> f64 {
        match self {
            Self::Frictionless => 0.0,
            Self::Realistic => 5.0,
            Self::Hostile => 20.0,
        }
    }

    pub fn commission_bps(self) -> f64 {
        match self {
            Self::Frictionless => 0.0,
            Self::Realistic => 5.0,
            Self::Hostile => 15.0,
        }
    }

    pub fn impact_coefficient(self) -> f64 {
        match self {
            Self::Hostile => 0.1,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Slippage in basis points of traded notional.
    pub slippage_bps: f64,
    /// Commission in basis points of traded notional.
    pub commission_bps: f64,
    pub impact_coefficient: f64,
    pub impact_exponent: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self::frictionless()
    }
}

impl CostModel {
    pub fn new(slippage_bps: f64, commission_bps: f64) -> Self {
        Self {
            slippage_bps,
            commission_bps,
            impact_coefficient: 0.0,
            impact_exponent: 0.5,
        }
    }

    pub fn from_preset(preset: CostPreset) -> Self {
        Self {
            impact_coefficient: preset.impact_coefficient(),
            ..Self::new(preset.slippage_bps(), preset.commission_bps())
        }
    }

    pub fn frictionless() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn with_impact(mut self, coefficient: f64, exponent: f64) -> Self {
        self.impact_coefficient = coefficient;
        self.impact_exponent = exponent;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("slippage_bps", self.slippage_bps),
            ("commission_bps", self.commission_bps),
            ("impact_coefficient", self.impact_coefficient),
            ("impact_exponent", self.impact_exponent),
        ];
        for (name, value) in fields {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(format!("{name} must be finite and >= 0, got {value}"));
            }
        }
        Ok(())
    }

    pub fn is_frictionless(&self) -> bool {
        self.proportional_rate() == 0.0 && self.impact_coefficient == 0.0
    }

    /// Proportional cost per unit of traded notional.
    pub fn proportional_rate(&self) -> f64 {
        (self.commission_bps + self.slippage_bps) / 10_000.0
    }

    /// Cost of trading `delta` (fraction of NAV), as a fraction of NAV.
    pub fn trade_cost(&self, delta: f64) -> f64 {
        let size = delta.abs();
        if size == 0.0 {
            return 0.0;
        }
        self.proportional_rate() * size
            + self.impact_coefficient * size.powf(1.0 + self.impact_exponent)
    }

    /// Currency cost of a rebalance with per-name weight trades.
    pub fn rebalance_cost(&self, nav: f64, trades: &WeightMap) -> f64 {
        nav * trades.values().map(|d| self.trade_cost(*d)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frictionless_costs_nothing() {
        let cost = CostModel::frictionless();
        assert!(cost.is_frictionless());
        assert_eq!(cost.trade_cost(0.5), 0.0);
    }

    #[test]
    fn proportional_cost() {
        let cost = CostModel::new(5.0, 5.0); // 10 bps total
        // 0.5 of NAV traded at 10 bps = 5 bps of NAV
        assert!((cost.trade_cost(-0.5) - 0.0005).abs() < 1e-15);
        let trades: WeightMap = [("A".to_string(), 0.5), ("B".to_string(), -0.5)]
            .into_iter()
            .collect();
        assert!((cost.rebalance_cost(100_000.0, &trades) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn impact_is_superlinear() {
        let cost = CostModel::frictionless().with_impact(0.1, 0.5);
        let small = cost.trade_cost(0.01);
        let large = cost.trade_cost(0.04);
        // 4x the size costs 8x under α = 0.5
        assert!((large / small - 8.0).abs() < 1e-9);
    }

    #[test]
    fn realistic_preset() {
        let cost = CostModel::from_preset(CostPreset::Realistic);
        assert_eq!(cost.slippage_bps, 5.0);
        assert_eq!(cost.commission_bps, 5.0);
        assert_eq!(cost.impact_coefficient, 0.0);
    }

    #[test]
    fn hostile_preset_highest_costs() {
        let frictionless = CostModel::from_preset(CostPreset::Frictionless);
        let realistic = CostModel::from_preset(CostPreset::Realistic);
        let hostile = CostModel::from_preset(CostPreset::Hostile);

        assert!(hostile.slippage_bps > realistic.slippage_bps);
        assert!(realistic.slippage_bps > frictionless.slippage_bps);
        assert!(hostile.commission_bps > realistic.commission_bps);
        assert!(hostile.trade_cost(0.1) > realistic.trade_cost(0.1));
    }

    #[test]
    fn negative_rates_rejected() {
        assert!(CostModel::new(-1.0, 0.0).validate().is_err());
        assert!(CostModel::from_preset(CostPreset::Hostile).validate().is_ok());
    }
}
