//! Deterministic threshold switching rule.
//!
//! The state at t is read off the current observation: market volatility
//! above `vol_threshold` is high-volatility (three-state rule only),
//! otherwise the sign of the market return picks expansion or contraction.
//! The transition matrix is the Laplace-smoothed count of observed switches.

use super::state::RegimeLabel;
use super::RegimeError;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub const EXPANSION: usize = 0;
pub const CONTRACTION: usize = 1;
pub const HIGH_VOLATILITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub n_states: usize,
    pub vol_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdFit {
    pub rule: ThresholdRule,
    pub transition: Array2<f64>,
    /// Observations assigned to each state over the window.
    pub state_counts: Vec<usize>,
}

impl ThresholdRule {
    pub fn new(n_states: usize, vol_threshold: f64) -> Result<Self, RegimeError> {
        if !(2..=3).contains(&n_states) {
            return Err(RegimeError::InvalidConfig(format!(
                "threshold rule supports 2 or 3 states, got {n_states}"
            )));
        }
        if !(vol_threshold.is_finite() && vol_threshold > 0.0) {
            return Err(RegimeError::InvalidConfig(format!(
                "vol_threshold must be > 0, got {vol_threshold}"
            )));
        }
        Ok(Self {
            n_states,
            vol_threshold,
        })
    }

    pub fn labels(&self) -> Vec<RegimeLabel> {
        let mut labels = vec![RegimeLabel::Expansion, RegimeLabel::Contraction];
        if self.n_states == 3 {
            labels.push(RegimeLabel::HighVolatility);
        }
        labels
    }

    /// State for one observation row `[market return, volatility, …]`.
    pub fn classify(&self, row: &[f64]) -> usize {
        let ret = row.first().copied().unwrap_or(0.0);
        let vol = row.get(1).copied().unwrap_or(0.0);
        if self.n_states >= 3 && vol > self.vol_threshold {
            HIGH_VOLATILITY
        } else if ret >= 0.0 {
            EXPANSION
        } else {
            CONTRACTION
        }
    }

    pub fn fit(&self, rows: &[&[f64]], min_observations: usize) -> Result<ThresholdFit, RegimeError> {
        let required = min_observations.max(2);
        if rows.len() < required {
            return Err(RegimeError::InsufficientObservations {
                available: rows.len(),
                required,
            });
        }
        let n = self.n_states;
        let path: Vec<usize> = rows.iter().map(|r| self.classify(r)).collect();
        let mut counts = Array2::<f64>::ones((n, n));
        for pair in path.windows(2) {
            counts[[pair[0], pair[1]]] += 1.0;
        }
        for mut row in counts.rows_mut() {
            let total = row.sum();
            row /= total;
        }
        let mut state_counts = vec![0; n];
        for s in &path {
            state_counts[*s] += 1;
        }
        Ok(ThresholdFit {
            rule: *self,
            transition: counts,
            state_counts,
        })
    }
}
