//! Mean-variance optimizer: maximize `μᵀw − (λ/2)·wᵀΣw` subject to the hard
//! constraints, by projected gradient ascent.

use super::{ConstructionError, ConstructionInput, PortfolioConstructor};
use crate::domain::{Symbol, WeightMap};
use ndarray::Array1;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MeanVariance {
    pub risk_aversion: f64,
    pub max_iterations: usize,
    /// Wall-clock budget per rebalance. `None` means iterations only.
    pub time_budget_ms: Option<u64>,
    /// Convergence threshold on the largest weight change per step.
    pub tolerance: f64,
}

impl PortfolioConstructor for MeanVariance {
    fn name(&self) -> &str {
        "mean_variance"
    }

    fn construct(&self, input: &ConstructionInput<'_>) -> Result<WeightMap, ConstructionError> {
        let c = input.constraints;
        // Names with both a forecast and a covariance row, in id order.
        let symbols: Vec<Symbol> = input
            .forecasts
            .keys()
            .filter(|s| input.risk.index_of(s).is_some())
            .cloned()
            .collect();
        c.check_feasible(symbols.len())?;
        if symbols.is_empty() {
            return Ok(WeightMap::new());
        }
        let sigma = input.risk.sub_covariance(&symbols).ok_or_else(|| {
            ConstructionError::InfeasibleConstraints {
                reason: "risk model lost a requested instrument".into(),
            }
        })?;
        let mu: Array1<f64> = symbols.iter().map(|s| input.forecasts[s]).collect();

        // ‖Σ‖∞ bounds the gradient's Lipschitz constant.
        let lipschitz = sigma
            .rows()
            .into_iter()
            .map(|r| r.iter().map(|x| x.abs()).sum::<f64>())
            .fold(0.0_f64, f64::max)
            * self.risk_aversion;
        let step = 1.0 / lipschitz.max(1e-12);

        let start: Vec<f64> = symbols
            .iter()
            .map(|s| input.current.get(s).copied().unwrap_or(0.0))
            .collect();
        let mut w = Array1::from(c.project(&start));

        let clock = Instant::now();
        for iteration in 1..=self.max_iterations {
            let grad = &mu - &(sigma.dot(&w) * self.risk_aversion);
            let ascent = &w + &(grad * step);
            let next = Array1::from(c.project(ascent.as_slice().unwrap_or(&[])));
            let change = (&next - &w).iter().fold(0.0_f64, |m, x| m.max(x.abs()));
            w = next;
            if change < self.tolerance {
                debug!(iteration, "mean-variance converged");
                return Ok(symbols.into_iter().zip(w.iter().copied()).collect());
            }
            if let Some(budget) = self.time_budget_ms {
                let elapsed_ms = clock.elapsed().as_millis() as u64;
                if elapsed_ms > budget {
                    return Err(ConstructionError::OptimizationTimeout {
                        iterations: iteration,
                        elapsed_ms,
                    });
                }
            }
        }
        Err(ConstructionError::OptimizationTimeout {
            iterations: self.max_iterations,
            elapsed_ms: clock.elapsed().as_millis() as u64,
        })
    }
}
