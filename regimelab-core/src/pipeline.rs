//! Research pipeline: wires the chain for one period and feeds the engine.
//!
//! Per rebalance period t:
//! 1. Factor scores at t (cached; training periods reuse them)
//! 2. Regime state at t (filtered, observations <= t)
//! 3. Expected returns from the factor model, trained on periods s with
//!    `s + horizon <= t`
//! 4. Risk model over the trailing window ending at t
//! 5. Target weights from the configured constructor
//!
//! Every input to step k reads panel data dated <= t only.

use crate::data::{Panel, UniverseRules};
use crate::domain::{Symbol, TargetWeights, WeightMap};
use crate::engine::{
    run_backtest, BacktestRun, EngineConfig, EngineError, PeriodContext, PeriodInput,
    SourceError, WeightSource,
};
use crate::factors::{FactorError, FactorLibrary, FactorScores, FactorSpec, Normalization};
use crate::model::{ExpectedReturns, FactorModel, ModelConfig, ModelError, TrainingPeriod};
use crate::portfolio::{
    ConstructionError, ConstructionInput, Constraints, ConstructorKind, PortfolioConstructor,
    RiskConfig, RiskModel,
};
use crate::regime::{RegimeConfig, RegimeDetector, RegimeError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What to do when a rebalance hits `InfeasibleConstraints`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasiblePolicy {
    /// Skip the rebalance and keep the rolled weights.
    #[default]
    Hold,
    /// Retry once with the net band widened and no turnover budget; hold if
    /// that also fails.
    RelaxSoft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub universe: UniverseRules,
    #[serde(default)]
    pub normalization: Normalization,
    pub factors: Vec<FactorSpec>,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub constructor: ConstructorKind,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub infeasible_policy: InfeasiblePolicy,
}

impl PipelineConfig {
    /// Single momentum factor, static regime, composite model, long-only
    /// top-`n` equal weight.
    pub fn momentum_top(n: usize, lookback: usize) -> Self {
        Self {
            universe: UniverseRules::default(),
            normalization: Normalization::default(),
            factors: vec![FactorSpec::new(
                crate::factors::FactorDefinition::Momentum { lookback, skip: 0 },
                1.0e-3,
            )],
            regime: RegimeConfig::default(),
            model: ModelConfig::default(),
            constructor: ConstructorKind::RankBucket {
                long_count: n,
                short_count: 0,
                weighting: crate::portfolio::BucketWeighting::Equal,
            },
            constraints: Constraints::default(),
            risk: RiskConfig::default(),
            infeasible_policy: InfeasiblePolicy::Hold,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.universe
            .validate()
            .map_err(PipelineError::InvalidConfig)?;
        self.constraints
            .validate()
            .map_err(PipelineError::InvalidConfig)?;
        self.risk.validate().map_err(PipelineError::InvalidConfig)?;
        self.regime.validate()?;
        self.model.validate()?;
        self.constructor.validate()?;
        for spec in &self.factors {
            spec.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Factor(#[from] FactorError),

    #[error(transparent)]
    Regime(#[from] RegimeError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

pub struct ResearchPipeline<'a> {
    panel: &'a Panel,
    library: FactorLibrary,
    detector: RegimeDetector,
    model: FactorModel,
    constructor: Box<dyn PortfolioConstructor>,
    constraints: Constraints,
    risk: RiskConfig,
    policy: InfeasiblePolicy,
    scores: BTreeMap<usize, FactorScores>,
    training: BTreeMap<usize, TrainingPeriod>,
    last_forecast: Option<ExpectedReturns>,
}

impl<'a> ResearchPipeline<'a> {
    /// Validate the configuration, build the factor library and fit every
    /// regime snapshot.
    pub fn new(panel: &'a Panel, config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let library = FactorLibrary::from_specs(
            &config.factors,
            config.normalization,
            config.universe.clone(),
        )?;
        let detector = RegimeDetector::estimate(panel, &config.universe, &config.regime)?;
        let prior: Vec<f64> = config.factors.iter().map(|f| f.weight).collect();
        let model = FactorModel::new(&config.model, prior)?;
        info!(
            periods = panel.len(),
            instruments = panel.instruments().len(),
            factors = library.factor_names().len(),
            constructor = config.constructor_name(),
            "research pipeline ready"
        );
        Ok(Self {
            panel,
            library,
            detector,
            model,
            constructor: config.constructor.build(),
            constraints: config.constraints.clone(),
            risk: config.risk.clone(),
            policy: config.infeasible_policy,
            scores: BTreeMap::new(),
            training: BTreeMap::new(),
            last_forecast: None,
        })
    }

    pub fn panel(&self) -> &Panel {
        self.panel
    }

    pub fn detector(&self) -> &RegimeDetector {
        &self.detector
    }

    pub fn library(&self) -> &FactorLibrary {
        &self.library
    }

    /// Factor scores at t, computed once.
    pub fn scores_at(&mut self, t: usize) -> Result<&FactorScores, FactorError> {
        if !self.scores.contains_key(&t) {
            let scores = self.library.compute(self.panel, t)?;
            self.scores.insert(t, scores);
        }
        self.scores
            .get(&t)
            .ok_or(FactorError::PeriodOutOfRange {
                period: t,
                len: self.panel.len(),
            })
    }

    fn training_for(&mut self, t: usize) -> Result<Vec<TrainingPeriod>, FactorError> {
        if !self.model.needs_training() {
            return Ok(Vec::new());
        }
        let Some(range) = self.model.training_range(t) else {
            return Ok(Vec::new());
        };
        let horizon = self.model.config().horizon;
        let panel = self.panel;
        let mut out = Vec::new();
        for s in range {
            if !self.training.contains_key(&s) {
                let regime = self.detector.state_at(s).label;
                let period = {
                    let scores = self.scores_at(s)?;
                    TrainingPeriod::from_scores(panel, scores, regime, horizon)
                };
                self.training.insert(s, period);
            }
            if let Some(p) = self.training.get(&s) {
                out.push(p.clone());
            }
        }
        Ok(out)
    }

    /// Expected returns at t.
    pub fn forecast_at(&mut self, t: usize) -> Result<ExpectedReturns, FactorError> {
        let training = self.training_for(t)?;
        let regime = self.detector.state_at(t);
        let scores = self.scores_at(t)?.clone();
        Ok(self.model.forecast(&scores, &regime, &training))
    }

    /// Target weights at t given the rolled holdings.
    pub fn targets_at(&mut self, t: usize, rolled: &WeightMap) -> Result<TargetWeights, SourceError> {
        let date = self.panel.date(t).ok_or(SourceError::TemporalOrder {
            period: t,
            requested: NaiveDate::MIN,
            expected: None,
        })?;
        let forecast = self.forecast_at(t)?;
        let symbols: Vec<Symbol> = forecast.forecasts.keys().cloned().collect();
        let risk = RiskModel::estimate(self.panel, &symbols, t, &self.risk);
        if !risk.excluded().is_empty() {
            debug!(period = t, excluded = risk.excluded().len(), "names without a full risk window");
        }

        let result = {
            let input = ConstructionInput {
                date,
                forecasts: &forecast.forecasts,
                risk: &risk,
                current: rolled,
                constraints: &self.constraints,
            };
            match self.constructor.rebalance(&input) {
                Err(ConstructionError::InfeasibleConstraints { reason })
                    if self.policy == InfeasiblePolicy::RelaxSoft =>
                {
                    warn!(period = t, %reason, "constraints infeasible, retrying relaxed");
                    let relaxed = self.constraints.relaxed();
                    self.constructor.rebalance(&ConstructionInput {
                        constraints: &relaxed,
                        ..input
                    })
                }
                other => other,
            }
        };
        self.last_forecast = Some(forecast);
        Ok(result?)
    }

    /// Realized returns for periods `start..=end`.
    pub fn period_inputs(&self, start: usize, end: usize) -> Vec<PeriodInput> {
        let end = end.min(self.panel.len().saturating_sub(1));
        (start..=end)
            .filter_map(|t| {
                let date = self.panel.date(t)?;
                let returns = self
                    .panel
                    .instruments()
                    .iter()
                    .filter_map(|s| self.panel.period_return(s, t).map(|r| (s.clone(), r)))
                    .collect();
                Some(PeriodInput {
                    period: t,
                    date,
                    returns,
                })
            })
            .collect()
    }

    /// Backtest periods `start..=end`.
    ///
    /// Unless `config` carries its own limits, the engine checks skipped
    /// small trades against the pipeline's hard constraints (widened when the
    /// policy is `RelaxSoft`, since relaxed targets only satisfy those).
    pub fn backtest(
        &mut self,
        start: usize,
        end: usize,
        config: &EngineConfig,
    ) -> Result<BacktestRun, EngineError> {
        let inputs = self.period_inputs(start, end);
        let mut config = config.clone();
        if config.constraints.is_none() {
            config.constraints = Some(match self.policy {
                InfeasiblePolicy::Hold => self.constraints.clone(),
                InfeasiblePolicy::RelaxSoft => self.constraints.relaxed(),
            });
        }
        run_backtest(&config, &inputs, self)
    }
}

impl PipelineConfig {
    fn constructor_name(&self) -> &'static str {
        match self.constructor {
            ConstructorKind::RankBucket { .. } => "rank_bucket",
            ConstructorKind::MeanVariance { .. } => "mean_variance",
            ConstructorKind::ZscoreInverseVol { .. } => "zscore_inverse_vol",
        }
    }
}

impl WeightSource for ResearchPipeline<'_> {
    fn target_weights(
        &mut self,
        period: usize,
        date: NaiveDate,
        rolled: &WeightMap,
    ) -> Result<TargetWeights, SourceError> {
        let expected = self.panel.date(period);
        if expected != Some(date) {
            return Err(SourceError::TemporalOrder {
                period,
                requested: date,
                expected,
            });
        }
        self.targets_at(period, rolled)
    }

    fn context(&mut self, period: usize, _date: NaiveDate) -> Result<PeriodContext, SourceError> {
        let state = self.detector.state_at(period);
        let excluded_instruments = self
            .last_forecast
            .as_ref()
            .filter(|f| f.period == period)
            .map(|f| f.excluded.clone())
            .unwrap_or_default();
        if state.is_degraded() {
            warn!(period, label = %state.label, "regime state from fallback snapshot");
        }
        Ok(PeriodContext {
            regime: Some(state.label),
            regime_degraded: state.is_degraded(),
            excluded_instruments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SyntheticConfig, SyntheticPanel};
    use crate::engine::PeriodStatus;
    use crate::factors::make_panel;

    #[test]
    fn forecasts_only_cover_complete_names() {
        let p = make_panel(&[
            ("A", &[100.0, 101.0, 103.0]),
            ("B", &[f64::NAN, 50.0, 49.0]),
        ]);
        let mut pipe = ResearchPipeline::new(&p, &PipelineConfig::momentum_top(1, 1)).unwrap();
        let er = pipe.forecast_at(1).unwrap();
        assert_eq!(er.forecasts.len(), 1);
        assert!(er.forecasts.contains_key("A"));
        assert_eq!(er.excluded, vec!["B".to_string()]);
    }

    #[test]
    fn mismatched_date_is_temporal_order() {
        let p = make_panel(&[("A", &[100.0, 101.0])]);
        let mut pipe = ResearchPipeline::new(&p, &PipelineConfig::momentum_top(1, 1)).unwrap();
        let wrong = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let err = pipe.target_weights(1, wrong, &WeightMap::new()).unwrap_err();
        assert!(matches!(err, SourceError::TemporalOrder { period: 1, .. }));
    }

    #[test]
    fn relax_soft_recovers_from_tight_net_band() {
        let p = make_panel(&[
            ("A", &[100.0, 101.0, 103.0, 104.0]),
            ("B", &[100.0, 99.0, 98.0, 99.0]),
        ]);
        let mut config = PipelineConfig::momentum_top(1, 1);
        config.constraints = Constraints {
            max_weight: 0.3,
            net_min: 0.9,
            ..Default::default()
        };
        let run_with = |policy: InfeasiblePolicy| {
            let mut cfg = config.clone();
            cfg.infeasible_policy = policy;
            let mut pipe = ResearchPipeline::new(&p, &cfg).unwrap();
            pipe.backtest(1, 3, &EngineConfig::new(100.0)).unwrap()
        };
        let held = run_with(InfeasiblePolicy::Hold);
        assert!(held.history.iter().all(|r| r.status.is_held()));
        let relaxed = run_with(InfeasiblePolicy::RelaxSoft);
        assert!(relaxed
            .history
            .iter()
            .all(|r| r.status == PeriodStatus::Rebalanced));
        assert!((relaxed.history[0].weights["A"] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn synthetic_backtest_runs_end_to_end() {
        let synth = SyntheticPanel::generate(&SyntheticConfig {
            instruments: 10,
            periods: 120,
            ..Default::default()
        })
        .unwrap();
        let mut pipe =
            ResearchPipeline::new(&synth.panel, &PipelineConfig::momentum_top(3, 20)).unwrap();
        let run = pipe.backtest(21, 119, &EngineConfig::new(1_000_000.0)).unwrap();
        assert_eq!(run.history.len(), 99);
        for rec in &run.history {
            assert!(rec.gross_exposure <= 1.0 + 1e-9);
            assert!(rec.weights.len() <= 3);
            assert_eq!(rec.regime, Some(crate::regime::RegimeLabel::Normal));
        }
    }

    #[test]
    fn no_trade_band_keeps_rebalanced_books_inside_the_constraints() {
        let synth = SyntheticPanel::generate(&SyntheticConfig {
            instruments: 10,
            periods: 120,
            ..Default::default()
        })
        .unwrap();
        let mut config = PipelineConfig::momentum_top(3, 20);
        config.constraints = Constraints {
            max_weight: 0.34,
            ..Default::default()
        };
        let engine = EngineConfig {
            min_trade_weight: 0.05,
            ..EngineConfig::new(1_000_000.0)
        };
        let mut pipe = ResearchPipeline::new(&synth.panel, &config).unwrap();
        let run = pipe.backtest(21, 119, &engine).unwrap();
        assert_eq!(run.config.constraints.as_ref(), Some(&config.constraints));
        for rec in run.history.iter().filter(|r| r.status == PeriodStatus::Rebalanced) {
            let broken = config.constraints.violations(&rec.weights);
            assert!(broken.is_empty(), "period {}: {broken:?}", rec.period);
        }
    }
}
