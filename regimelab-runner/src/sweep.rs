//! Parameter sweeps over a base research configuration.
//!
//! Every grid point is an independent, immutable `ResearchConfig`. Points run
//! concurrently with rayon against one shared panel; each builds its own
//! pipeline and engine state, so results do not depend on scheduling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use tracing::{info, warn};

use regimelab_core::engine::CostPreset;
use regimelab_core::portfolio::ConstructorKind;
use regimelab_core::regime::RegimeModelKind;

use crate::config::{ConfigError, CostConfig, ResearchConfig};
use crate::data_loader::LoadedPanel;
use crate::metrics::PerformanceReport;
use crate::runner::run_on_panel;

/// One swept parameter and the values it takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "param", rename_all = "snake_case")]
pub enum SweepAxis {
    RebalanceEvery { values: Vec<usize> },
    /// Rank-bucket long count.
    LongCount { values: Vec<usize> },
    /// Mean-variance risk aversion.
    RiskAversion { values: Vec<f64> },
    MaxWeight { values: Vec<f64> },
    /// State count of an HMM or threshold regime model.
    RegimeStates { values: Vec<usize> },
    Costs { values: Vec<CostPreset> },
}

impl SweepAxis {
    fn name(&self) -> &'static str {
        match self {
            Self::RebalanceEvery { .. } => "rebalance_every",
            Self::LongCount { .. } => "long_count",
            Self::RiskAversion { .. } => "risk_aversion",
            Self::MaxWeight { .. } => "max_weight",
            Self::RegimeStates { .. } => "regime_states",
            Self::Costs { .. } => "costs",
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::RebalanceEvery { values }
            | Self::LongCount { values }
            | Self::RegimeStates { values } => values.len(),
            Self::RiskAversion { values } | Self::MaxWeight { values } => values.len(),
            Self::Costs { values } => values.len(),
        }
    }

    /// Set value `i` of this axis on `config`; returns the label fragment.
    fn apply(&self, i: usize, config: &mut ResearchConfig) -> Result<String, ConfigError> {
        let unsupported = |what: &str| {
            ConfigError::Invalid(format!(
                "sweep axis '{}' needs {what} in the base config",
                self.name()
            ))
        };
        let value = match self {
            Self::RebalanceEvery { values } => {
                config.backtest.rebalance_every = values[i];
                values[i].to_string()
            }
            Self::LongCount { values } => match &mut config.pipeline.constructor {
                ConstructorKind::RankBucket { long_count, .. } => {
                    *long_count = values[i];
                    values[i].to_string()
                }
                _ => return Err(unsupported("a rank_bucket constructor")),
            },
            Self::RiskAversion { values } => match &mut config.pipeline.constructor {
                ConstructorKind::MeanVariance { risk_aversion, .. } => {
                    *risk_aversion = values[i];
                    values[i].to_string()
                }
                _ => return Err(unsupported("a mean_variance constructor")),
            },
            Self::MaxWeight { values } => {
                config.pipeline.constraints.max_weight = values[i];
                values[i].to_string()
            }
            Self::RegimeStates { values } => match &mut config.pipeline.regime.model {
                RegimeModelKind::Hmm { n_states, .. }
                | RegimeModelKind::Threshold { n_states, .. } => {
                    *n_states = values[i];
                    values[i].to_string()
                }
                RegimeModelKind::Static => return Err(unsupported("an hmm or threshold regime model")),
            },
            Self::Costs { values } => {
                config.backtest.costs = CostConfig::Preset { preset: values[i] };
                format!("{:?}", values[i]).to_lowercase()
            }
        };
        Ok(format!("{}={value}", self.name()))
    }
}

/// What sweep results are ranked by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    #[default]
    Sharpe,
    Sortino,
    Calmar,
    AnnualizedReturn,
}

impl RankMetric {
    pub fn value(self, report: &PerformanceReport) -> f64 {
        match self {
            Self::Sharpe => report.sharpe,
            Self::Sortino => report.sortino,
            Self::Calmar => report.calmar,
            Self::AnnualizedReturn => report.annualized_return,
        }
    }
}

/// Sweep document: a base configuration plus the axes to vary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub base: ResearchConfig,
    #[serde(default)]
    pub axes: Vec<SweepAxis>,
    #[serde(default)]
    pub rank_by: RankMetric,
}

impl SweepConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.base.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Total number of grid points.
    pub fn size(&self) -> usize {
        self.axes.iter().map(SweepAxis::len).product()
    }

    /// Cartesian product of all axes, first axis varying slowest. Every point
    /// is validated.
    pub fn expand(&self) -> Result<Vec<SweepPoint>, ConfigError> {
        let size = self.size();
        let mut points = Vec::with_capacity(size);
        for flat in 0..size {
            let mut config = self.base.clone();
            let mut labels = Vec::with_capacity(self.axes.len());
            let mut stride = size;
            for axis in &self.axes {
                stride /= axis.len();
                labels.push(axis.apply((flat / stride) % axis.len(), &mut config)?);
            }
            config.validate()?;
            let label = if labels.is_empty() {
                "base".to_string()
            } else {
                labels.join(",")
            };
            points.push(SweepPoint { label, config });
        }
        Ok(points)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    pub label: String,
    pub config: ResearchConfig,
}

/// Outcome of one grid point: a report, or the error that stopped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub label: String,
    pub run_id: Option<String>,
    pub report: Option<PerformanceReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResults {
    pub dataset_hash: String,
    pub rank_by: RankMetric,
    /// Ranked best first; failed points last.
    pub outcomes: Vec<SweepOutcome>,
}

impl SweepResults {
    pub fn best(&self) -> Option<&SweepOutcome> {
        self.outcomes.first().filter(|o| o.report.is_some())
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

/// Run every grid point against `loaded`.
///
/// A point that fails (infeasible configuration for this panel, engine error)
/// is recorded with its error and ranked last; it does not abort the sweep.
pub fn run_sweep(sweep: &SweepConfig, loaded: &LoadedPanel) -> Result<SweepResults, ConfigError> {
    let points = sweep.expand()?;
    info!(points = points.len(), axes = sweep.axes.len(), "sweep started");

    let mut outcomes: Vec<SweepOutcome> = points
        .par_iter()
        .map(|point| match run_on_panel(&point.config, loaded) {
            Ok(result) => SweepOutcome {
                label: point.label.clone(),
                run_id: Some(result.run_id),
                report: Some(result.report),
                error: None,
            },
            Err(e) => {
                warn!(label = %point.label, error = %e, "sweep point failed");
                SweepOutcome {
                    label: point.label.clone(),
                    run_id: None,
                    report: None,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();

    let metric = sweep.rank_by;
    outcomes.sort_by(|a, b| match (&a.report, &b.report) {
        (Some(ra), Some(rb)) => metric
            .value(rb)
            .total_cmp(&metric.value(ra))
            .then_with(|| a.label.cmp(&b.label)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.label.cmp(&b.label),
    });

    let results = SweepResults {
        dataset_hash: loaded.dataset_hash.clone(),
        rank_by: metric,
        outcomes,
    };
    info!(
        failures = results.failures(),
        best = results.best().map(|o| o.label.as_str()).unwrap_or("-"),
        "sweep finished"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ResearchConfig {
        ResearchConfig::synthetic_demo()
    }

    #[test]
    fn grid_size_is_product_of_axes() {
        let sweep = SweepConfig {
            base: base(),
            axes: vec![
                SweepAxis::LongCount { values: vec![5, 10, 15] },
                SweepAxis::RebalanceEvery { values: vec![1, 5] },
            ],
            rank_by: RankMetric::Sharpe,
        };
        assert_eq!(sweep.size(), 6);
        let points = sweep.expand().unwrap();
        assert_eq!(points.len(), 6);
        assert_eq!(points[0].label, "long_count=5,rebalance_every=1");
        assert_eq!(points[1].label, "long_count=5,rebalance_every=5");
        assert_eq!(points[5].label, "long_count=15,rebalance_every=5");
        assert_eq!(points[5].config.backtest.rebalance_every, 5);
    }

    #[test]
    fn no_axes_is_the_base_point() {
        let sweep = SweepConfig {
            base: base(),
            axes: Vec::new(),
            rank_by: RankMetric::default(),
        };
        let points = sweep.expand().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].label, "base");
        assert_eq!(points[0].config, base());
    }

    #[test]
    fn axis_for_a_different_constructor_is_rejected() {
        let sweep = SweepConfig {
            base: base(),
            axes: vec![SweepAxis::RiskAversion { values: vec![1.0] }],
            rank_by: RankMetric::Sharpe,
        };
        assert!(matches!(sweep.expand(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_point_is_rejected_up_front() {
        let sweep = SweepConfig {
            base: base(),
            axes: vec![SweepAxis::RebalanceEvery { values: vec![1, 0] }],
            rank_by: RankMetric::Sharpe,
        };
        assert!(sweep.expand().is_err());
    }

    #[test]
    fn sweep_document_parses() {
        let mut doc = String::from("rank_by = \"calmar\"\n\n");
        let base_toml = base().to_toml_string().unwrap();
        for line in base_toml.lines() {
            // Nest every table of the base document under `base`.
            if let Some(rest) = line.strip_prefix("[[") {
                doc.push_str(&format!("[[base.{rest}\n"));
            } else if let Some(rest) = line.strip_prefix('[') {
                doc.push_str(&format!("[base.{rest}\n"));
            } else {
                doc.push_str(line);
                doc.push('\n');
            }
        }
        doc.push_str("\n[[axes]]\nparam = \"costs\"\nvalues = [\"frictionless\", \"hostile\"]\n");
        let sweep = SweepConfig::from_toml_str(&doc).unwrap();
        assert_eq!(sweep.base, base());
        assert_eq!(sweep.rank_by, RankMetric::Calmar);
        let points = sweep.expand().unwrap();
        assert_eq!(points[1].label, "costs=hostile");
    }
}
