//! Portfolio construction: expected returns + risk model → target weights.
//!
//! Constructors share one interface. `rebalance` wraps every constructor with
//! the same contract: reject infeasible constraint sets up front, verify the
//! produced weights against the hard constraints, then apply the soft
//! turnover budget.

pub mod constraints;
pub mod mean_variance;
pub mod rank_bucket;
pub mod risk;
pub mod zscore;

pub use constraints::{water_fill, Constraints, CONSTRAINT_TOLERANCE};
pub use mean_variance::MeanVariance;
pub use rank_bucket::{BucketWeighting, RankBucket};
pub use risk::{RiskConfig, RiskModel};
pub use zscore::ZScoreInverseVol;

use crate::domain::{Symbol, TargetWeights, WeightMap};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("infeasible constraints: {reason}")]
    InfeasibleConstraints { reason: String },

    #[error("optimizer stopped after {iterations} iterations ({elapsed_ms} ms) without converging")]
    OptimizationTimeout { iterations: usize, elapsed_ms: u64 },

    #[error("invalid constructor configuration: {0}")]
    InvalidConfig(String),
}

/// Everything a constructor may read for one rebalance.
#[derive(Debug, Clone, Copy)]
pub struct ConstructionInput<'a> {
    pub date: NaiveDate,
    pub forecasts: &'a BTreeMap<Symbol, f64>,
    pub risk: &'a RiskModel,
    /// Rolled holdings before the trade.
    pub current: &'a WeightMap,
    pub constraints: &'a Constraints,
}

impl ConstructionInput<'_> {
    /// Forecast names sorted by forecast descending, ties by id ascending.
    pub fn ranked(&self) -> Vec<(&Symbol, f64)> {
        let mut ranked: Vec<(&Symbol, f64)> =
            self.forecasts.iter().map(|(s, f)| (s, *f)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Portfolio construction logic.
///
/// # Responsibilities
/// - Convert forecasts + risk model → target weights
/// - Respect the hard constraints handed in with the input
///
/// # Non-Responsibilities
/// - Constructors do NOT apply the turnover budget (`rebalance` does)
/// - Constructors do NOT decide what happens on failure (the pipeline does)
pub trait PortfolioConstructor: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn construct(&self, input: &ConstructionInput<'_>) -> Result<WeightMap, ConstructionError>;

    /// Feasibility check, construction, hard-constraint verification and
    /// turnover budget, in that order.
    fn rebalance(&self, input: &ConstructionInput<'_>) -> Result<TargetWeights, ConstructionError> {
        let constraints = input.constraints;
        constraints.check_feasible(input.forecasts.len())?;
        let weights = self.construct(input)?;
        let violations = constraints.violations(&weights);
        if !violations.is_empty() {
            return Err(ConstructionError::InfeasibleConstraints {
                reason: format!("{}: {}", self.name(), violations.join("; ")),
            });
        }
        let weights = constraints.apply_turnover_budget(&weights, input.current);
        Ok(TargetWeights::new(input.date, weights))
    }
}

// ─── Configuration ──────────────────────────────────────────────────

fn default_max_iterations() -> usize {
    500
}

fn default_tolerance() -> f64 {
    1e-8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstructorKind {
    RankBucket {
        long_count: usize,
        #[serde(default)]
        short_count: usize,
        #[serde(default)]
        weighting: BucketWeighting,
    },
    MeanVariance {
        risk_aversion: f64,
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
        #[serde(default)]
        time_budget_ms: Option<u64>,
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    ZscoreInverseVol {
        threshold: f64,
    },
}

impl Default for ConstructorKind {
    fn default() -> Self {
        Self::RankBucket {
            long_count: 10,
            short_count: 0,
            weighting: BucketWeighting::Equal,
        }
    }
}

impl ConstructorKind {
    pub fn validate(&self) -> Result<(), ConstructionError> {
        let invalid = |msg: String| Err(ConstructionError::InvalidConfig(msg));
        match self {
            Self::RankBucket {
                long_count,
                short_count,
                ..
            } => {
                if long_count + short_count == 0 {
                    return invalid("rank_bucket needs long_count + short_count >= 1".into());
                }
            }
            Self::MeanVariance {
                risk_aversion,
                max_iterations,
                tolerance,
                ..
            } => {
                if !(*risk_aversion > 0.0 && risk_aversion.is_finite()) {
                    return invalid(format!("risk_aversion must be > 0, got {risk_aversion}"));
                }
                if *max_iterations == 0 {
                    return invalid("max_iterations must be >= 1".into());
                }
                if !(*tolerance > 0.0) {
                    return invalid(format!("tolerance must be > 0, got {tolerance}"));
                }
            }
            Self::ZscoreInverseVol { threshold } => {
                if !(*threshold >= 0.0 && threshold.is_finite()) {
                    return invalid(format!("threshold must be >= 0, got {threshold}"));
                }
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Box<dyn PortfolioConstructor> {
        match self {
            Self::RankBucket {
                long_count,
                short_count,
                weighting,
            } => Box::new(RankBucket::new(*long_count, *short_count, *weighting)),
            Self::MeanVariance {
                risk_aversion,
                max_iterations,
                time_budget_ms,
                tolerance,
            } => Box::new(MeanVariance {
                risk_aversion: *risk_aversion,
                max_iterations: *max_iterations,
                time_budget_ms: *time_budget_ms,
                tolerance: *tolerance,
            }),
            Self::ZscoreInverseVol { threshold } => Box::new(ZScoreInverseVol::new(*threshold)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_breaks_ties_by_symbol() {
        let forecasts: BTreeMap<Symbol, f64> = [("B", 1.0), ("A", 1.0), ("C", 2.0)]
            .iter()
            .map(|(s, f)| (s.to_string(), *f))
            .collect();
        let risk = RiskModel::diagonal(&[]);
        let current = WeightMap::new();
        let constraints = Constraints::default();
        let input = ConstructionInput {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            forecasts: &forecasts,
            risk: &risk,
            current: &current,
            constraints: &constraints,
        };
        let order: Vec<&str> = input.ranked().iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "B"]);
    }

    #[test]
    fn constructor_kind_parses() {
        let kind: ConstructorKind =
            serde_json::from_str(r#"{"kind": "mean_variance", "risk_aversion": 5.0}"#).unwrap();
        assert_eq!(
            kind,
            ConstructorKind::MeanVariance {
                risk_aversion: 5.0,
                max_iterations: 500,
                time_budget_ms: None,
                tolerance: 1e-8,
            }
        );
        assert_eq!(kind.build().name(), "mean_variance");
    }

    #[test]
    fn empty_bucket_rejected() {
        let kind = ConstructorKind::RankBucket {
            long_count: 0,
            short_count: 0,
            weighting: BucketWeighting::Equal,
        };
        assert!(kind.validate().is_err());
    }
}
