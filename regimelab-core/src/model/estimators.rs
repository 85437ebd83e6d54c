//! Coefficient estimators behind the factor model.
//!
//! Every estimator receives the training periods already restricted to the
//! walk-forward window (forward returns realized by the forecast period), the
//! current regime label and the configured prior factor weights.

use super::linalg::{ridge, solve_symmetric};
use super::{Coefficients, ModelError, TrainingPeriod};
use crate::regime::RegimeLabel;
use crate::stats::mean;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fmt::Debug;

pub trait CoefficientEstimator: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn estimate(
        &self,
        training: &[TrainingPeriod],
        regime: RegimeLabel,
        prior: &[f64],
    ) -> Result<Coefficients, ModelError>;
}

/// Design matrix `[1, z…]` and target vector for a set of training rows.
fn design<'a>(
    rows: impl Iterator<Item = (&'a [f64], f64)>,
    k: usize,
    extra: usize,
) -> (Vec<f64>, Vec<f64>, usize) {
    let mut flat = Vec::new();
    let mut targets = Vec::new();
    let mut n = 0;
    for (features, target) in rows {
        flat.push(1.0);
        flat.extend_from_slice(&features[..k]);
        flat.extend(std::iter::repeat(0.0).take(extra));
        targets.push(target);
        n += 1;
    }
    (flat, targets, n)
}

fn to_arrays(flat: Vec<f64>, targets: Vec<f64>, n: usize, cols: usize) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_vec((n, cols), flat).unwrap_or_else(|_| Array2::zeros((0, cols)));
    (x, Array1::from(targets))
}

// ─── Composite ──────────────────────────────────────────────────────

/// Fixed factor weights; no training.
#[derive(Debug, Clone, Default)]
pub struct CompositeEstimator;

impl CoefficientEstimator for CompositeEstimator {
    fn name(&self) -> &str {
        "composite"
    }

    fn estimate(
        &self,
        _training: &[TrainingPeriod],
        _regime: RegimeLabel,
        prior: &[f64],
    ) -> Result<Coefficients, ModelError> {
        Ok(Coefficients::from_prior(prior))
    }
}

// ─── Separate coefficients per regime ───────────────────────────────

/// Fama-MacBeth: one cross-sectional ridge regression per training period,
/// averaged over the periods that share the current regime label.
#[derive(Debug, Clone)]
pub struct FamaMacBeth {
    pub ridge: f64,
    pub min_periods: usize,
}

impl CoefficientEstimator for FamaMacBeth {
    fn name(&self) -> &str {
        "fama_macbeth"
    }

    fn estimate(
        &self,
        training: &[TrainingPeriod],
        regime: RegimeLabel,
        prior: &[f64],
    ) -> Result<Coefficients, ModelError> {
        let k = prior.len();
        let matching: Vec<&TrainingPeriod> = training
            .iter()
            .filter(|p| p.regime == regime && p.len() >= k + 2)
            .collect();
        if matching.len() < self.min_periods.max(1) {
            return Err(ModelError::InsufficientTraining {
                available: matching.len(),
                required: self.min_periods.max(1),
            });
        }

        let fits: Vec<Result<Array1<f64>, ModelError>> = matching
            .par_iter()
            .map(|p| {
                let (flat, targets, n) = design(p.rows(), k, 0);
                let (x, y) = to_arrays(flat, targets, n, k + 1);
                ridge(&x, &y, self.ridge, true)
            })
            .collect();

        let mut sum = Array1::<f64>::zeros(k + 1);
        for fit in fits {
            sum += &fit?;
        }
        sum /= matching.len() as f64;
        Ok(Coefficients {
            intercept: sum[0],
            factor_betas: sum.iter().skip(1).copied().collect(),
            regime_effect: 0.0,
        })
    }
}

// ─── Regime as an extra regressor ───────────────────────────────────

/// Pooled ridge regression over all training samples with one-hot regime
/// dummies (the first label in sort order is the baseline).
#[derive(Debug, Clone)]
pub struct PooledRegimeRegressor {
    pub ridge: f64,
    pub min_periods: usize,
}

impl CoefficientEstimator for PooledRegimeRegressor {
    fn name(&self) -> &str {
        "pooled_regime_regressor"
    }

    fn estimate(
        &self,
        training: &[TrainingPeriod],
        regime: RegimeLabel,
        prior: &[f64],
    ) -> Result<Coefficients, ModelError> {
        let k = prior.len();
        let usable: Vec<&TrainingPeriod> = training.iter().filter(|p| !p.is_empty()).collect();
        if usable.len() < self.min_periods.max(1) {
            return Err(ModelError::InsufficientTraining {
                available: usable.len(),
                required: self.min_periods.max(1),
            });
        }

        let labels: Vec<RegimeLabel> = usable
            .iter()
            .map(|p| p.regime)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let dummies = labels.len().saturating_sub(1);
        let cols = 1 + k + dummies;

        let mut flat = Vec::new();
        let mut targets = Vec::new();
        let mut n = 0;
        for p in &usable {
            let slot = labels.iter().position(|l| *l == p.regime).unwrap_or(0);
            let (mut block, mut ys, rows) = design(p.rows(), k, dummies);
            if slot > 0 {
                for r in 0..rows {
                    block[r * cols + k + slot] = 1.0;
                }
            }
            flat.append(&mut block);
            targets.append(&mut ys);
            n += rows;
        }
        let (x, y) = to_arrays(flat, targets, n, cols);
        let beta = ridge(&x, &y, self.ridge, true)?;

        let regime_effect = labels
            .iter()
            .position(|l| *l == regime)
            .filter(|&slot| slot > 0)
            .map(|slot| beta[k + slot])
            .unwrap_or(0.0);
        Ok(Coefficients {
            intercept: beta[0],
            factor_betas: beta.iter().skip(1).take(k).copied().collect(),
            regime_effect,
        })
    }
}

// ─── Bayesian ───────────────────────────────────────────────────────

/// Conjugate Gaussian linear regression per regime. The prior mean is the
/// configured factor weights (zero intercept) with precision
/// `prior_precision · I`; the noise variance is the sample variance of the
/// pooled targets.
#[derive(Debug, Clone)]
pub struct BayesianRegression {
    pub prior_precision: f64,
    pub min_periods: usize,
}

impl CoefficientEstimator for BayesianRegression {
    fn name(&self) -> &str {
        "bayesian"
    }

    fn estimate(
        &self,
        training: &[TrainingPeriod],
        regime: RegimeLabel,
        prior: &[f64],
    ) -> Result<Coefficients, ModelError> {
        let k = prior.len();
        let matching: Vec<&TrainingPeriod> = training
            .iter()
            .filter(|p| p.regime == regime && !p.is_empty())
            .collect();
        if matching.len() < self.min_periods.max(1) {
            return Err(ModelError::InsufficientTraining {
                available: matching.len(),
                required: self.min_periods.max(1),
            });
        }

        let (flat, targets, n) = design(matching.iter().flat_map(|p| p.rows()), k, 0);
        let noise = {
            let m = mean(&targets);
            let var = targets.iter().map(|y| (y - m).powi(2)).sum::<f64>() / n.max(1) as f64;
            var.max(1e-12)
        };
        let (x, y) = to_arrays(flat, targets, n, k + 1);

        let mut prior_mean = Array1::<f64>::zeros(k + 1);
        for (i, w) in prior.iter().enumerate() {
            prior_mean[i + 1] = *w;
        }
        let mut precision = x.t().dot(&x) / noise;
        for i in 0..=k {
            precision[[i, i]] += self.prior_precision;
        }
        let rhs = &prior_mean * self.prior_precision + x.t().dot(&y) / noise;
        let posterior = solve_symmetric(&precision, &rhs)?;

        Ok(Coefficients {
            intercept: posterior[0],
            factor_betas: posterior.iter().skip(1).copied().collect(),
            regime_effect: 0.0,
        })
    }
}
