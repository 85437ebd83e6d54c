//! Factor model: factor scores + regime state → expected returns.
//!
//! Walk-forward only. The coefficients used at period t come from training
//! periods s with `s + horizon <= t`, so every forward return they learn from
//! is realized by t. Until enough qualifying periods exist (or when the
//! normal equations are singular) the model forecasts with the configured
//! prior factor weights and marks the forecast `prior`.

pub mod estimators;
pub mod linalg;

pub use estimators::{
    BayesianRegression, CoefficientEstimator, CompositeEstimator, FamaMacBeth,
    PooledRegimeRegressor,
};

use crate::data::Panel;
use crate::domain::Symbol;
use crate::factors::FactorScores;
use crate::regime::{RegimeLabel, RegimeState};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("insufficient training data: {available} qualifying periods, {required} required")]
    InsufficientTraining { available: usize, required: usize },

    #[error("singular normal equations: {reason}")]
    Singular { reason: String },

    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
}

// ─── Configuration ──────────────────────────────────────────────────

/// How the regime enters a regression model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimePolicy {
    /// One coefficient set per regime label.
    SeparateCoefficients,
    /// Pooled regression with the regime label as a categorical regressor.
    RegimeRegressor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorKind {
    Composite,
    Regression { policy: RegimePolicy },
    Bayesian { prior_precision: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub estimator: EstimatorKind,
    /// Forward-return horizon in periods.
    pub horizon: usize,
    /// Most recent periods eligible as training samples.
    pub training_window: usize,
    pub min_training_periods: usize,
    pub ridge: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorKind::Composite,
            horizon: 1,
            training_window: 252,
            min_training_periods: 20,
            ridge: 1e-4,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.horizon == 0 {
            return Err(ModelError::InvalidConfig("horizon must be >= 1".into()));
        }
        if self.training_window == 0 {
            return Err(ModelError::InvalidConfig(
                "training_window must be >= 1".into(),
            ));
        }
        if !(self.ridge >= 0.0 && self.ridge.is_finite()) {
            return Err(ModelError::InvalidConfig(format!(
                "ridge must be >= 0, got {}",
                self.ridge
            )));
        }
        if let EstimatorKind::Bayesian { prior_precision } = self.estimator {
            if !(prior_precision > 0.0 && prior_precision.is_finite()) {
                return Err(ModelError::InvalidConfig(format!(
                    "prior_precision must be > 0, got {prior_precision}"
                )));
            }
        }
        Ok(())
    }

    fn build_estimator(&self) -> Box<dyn CoefficientEstimator> {
        let min_periods = self.min_training_periods;
        match self.estimator {
            EstimatorKind::Composite => Box::new(CompositeEstimator),
            EstimatorKind::Regression {
                policy: RegimePolicy::SeparateCoefficients,
            } => Box::new(FamaMacBeth {
                ridge: self.ridge,
                min_periods,
            }),
            EstimatorKind::Regression {
                policy: RegimePolicy::RegimeRegressor,
            } => Box::new(PooledRegimeRegressor {
                ridge: self.ridge,
                min_periods,
            }),
            EstimatorKind::Bayesian { prior_precision } => Box::new(BayesianRegression {
                prior_precision,
                min_periods,
            }),
        }
    }
}

// ─── Training data and outputs ──────────────────────────────────────

/// Cross-section observed at training period `period`: normalized factor
/// vectors and the realized forward return over the model horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPeriod {
    pub period: usize,
    pub regime: RegimeLabel,
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl TrainingPeriod {
    /// Pair complete score vectors at `scores.period` with forward returns
    /// over `horizon`. Instruments without a realized forward return are
    /// skipped.
    pub fn from_scores(
        panel: &Panel,
        scores: &FactorScores,
        regime: RegimeLabel,
        horizon: usize,
    ) -> Self {
        let s = scores.period;
        let (features, targets) = scores
            .complete()
            .into_iter()
            .filter_map(|(sym, z)| panel.return_between(&sym, s, s + horizon).map(|r| (z, r)))
            .unzip();
        Self {
            period: s,
            regime,
            features,
            targets,
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&[f64], f64)> + '_ {
        self.features
            .iter()
            .map(Vec::as_slice)
            .zip(self.targets.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub intercept: f64,
    /// One beta per factor, in factor order.
    pub factor_betas: Vec<f64>,
    /// Additive effect of the current regime (pooled policy only).
    pub regime_effect: f64,
}

impl Coefficients {
    pub fn from_prior(prior: &[f64]) -> Self {
        Self {
            intercept: 0.0,
            factor_betas: prior.to_vec(),
            regime_effect: 0.0,
        }
    }

    pub fn predict(&self, z: &[f64]) -> f64 {
        self.intercept
            + self.regime_effect
            + self
                .factor_betas
                .iter()
                .zip(z)
                .map(|(b, x)| b * x)
                .sum::<f64>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastBasis {
    /// Fixed composite weights.
    Composite,
    /// Coefficients estimated from training data.
    Fitted,
    /// Fallback to prior weights (warm-up or failed estimation).
    Prior,
}

/// Forecasts for one period. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedReturns {
    pub period: usize,
    pub date: NaiveDate,
    pub regime: RegimeLabel,
    pub basis: ForecastBasis,
    pub coefficients: Coefficients,
    pub forecasts: BTreeMap<Symbol, f64>,
    /// Eligible instruments missing a required factor.
    pub excluded: Vec<Symbol>,
}

// ─── Model ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FactorModel {
    config: ModelConfig,
    prior: Vec<f64>,
    estimator: Box<dyn CoefficientEstimator>,
}

impl FactorModel {
    /// `prior` holds one weight per factor, in factor order.
    pub fn new(config: &ModelConfig, prior: Vec<f64>) -> Result<Self, ModelError> {
        config.validate()?;
        if prior.is_empty() {
            return Err(ModelError::InvalidConfig(
                "at least one factor weight is required".into(),
            ));
        }
        Ok(Self {
            estimator: config.build_estimator(),
            config: config.clone(),
            prior,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn prior(&self) -> &[f64] {
        &self.prior
    }

    pub fn needs_training(&self) -> bool {
        self.config.estimator != EstimatorKind::Composite
    }

    /// Training sample periods for a forecast at t: the most recent
    /// `training_window` periods s with `s + horizon <= t`.
    pub fn training_range(&self, t: usize) -> Option<RangeInclusive<usize>> {
        let end = t.checked_sub(self.config.horizon)?;
        let start = (end + 1).saturating_sub(self.config.training_window);
        Some(start..=end)
    }

    /// Forecast for `scores.period`. `training` must come from
    /// `training_range(scores.period)`.
    pub fn forecast(
        &self,
        scores: &FactorScores,
        regime: &RegimeState,
        training: &[TrainingPeriod],
    ) -> ExpectedReturns {
        let t = scores.period;
        debug_assert!(training
            .iter()
            .all(|p| p.period + self.config.horizon <= t));

        let (coefficients, basis) =
            match self.estimator.estimate(training, regime.label, &self.prior) {
                Ok(c) if !self.needs_training() => (c, ForecastBasis::Composite),
                Ok(c) => (c, ForecastBasis::Fitted),
                Err(e @ ModelError::InsufficientTraining { .. }) => {
                    debug!(period = t, estimator = self.estimator.name(), error = %e, "using prior weights");
                    (Coefficients::from_prior(&self.prior), ForecastBasis::Prior)
                }
                Err(e) => {
                    warn!(period = t, estimator = self.estimator.name(), error = %e, "coefficient estimation failed, using prior weights");
                    (Coefficients::from_prior(&self.prior), ForecastBasis::Prior)
                }
            };

        let forecasts = scores
            .complete()
            .into_iter()
            .map(|(sym, z)| {
                let f = coefficients.predict(&z);
                (sym, f)
            })
            .collect();

        ExpectedReturns {
            period: t,
            date: scores.date,
            regime: regime.label,
            basis,
            coefficients,
            forecasts,
            excluded: scores.incomplete(),
        }
    }
}
