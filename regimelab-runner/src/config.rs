//! TOML research configuration.
//!
//! One document fixes everything a run depends on: the data source, the
//! backtest range and costs, and the full research pipeline (universe,
//! factors, regime model, estimator, constructor, constraints). Two runs with
//! equal configurations on equal data share a `run_id`.

use chrono::NaiveDate;
use regimelab_core::domain::RunId;
use regimelab_core::engine::{CostModel, CostPreset, EngineConfig};
use regimelab_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data_loader::{DataConfig, DataSpec};
use crate::metrics::DEFAULT_PERIODS_PER_YEAR;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("failed to hash config: {0}")]
    Hash(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Transaction cost selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostConfig {
    Preset { preset: CostPreset },
    Custom(CostModel),
}

impl Default for CostConfig {
    fn default() -> Self {
        Self::Preset {
            preset: CostPreset::Frictionless,
        }
    }
}

impl CostConfig {
    pub fn model(&self) -> CostModel {
        match self {
            Self::Preset { preset } => CostModel::from_preset(*preset),
            Self::Custom(model) => model.clone(),
        }
    }
}

fn default_initial_nav() -> f64 {
    1_000_000.0
}

fn default_rebalance_every() -> usize {
    1
}

fn default_periods_per_year() -> f64 {
    DEFAULT_PERIODS_PER_YEAR
}

/// Backtest range, capital and costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    /// First period simulated (inclusive). Earlier data is history only.
    pub start: NaiveDate,
    /// Last period simulated (inclusive).
    pub end: NaiveDate,
    #[serde(default = "default_initial_nav")]
    pub initial_nav: f64,
    #[serde(default = "default_rebalance_every")]
    pub rebalance_every: usize,
    #[serde(default)]
    pub min_trade_weight: f64,
    #[serde(default)]
    pub costs: CostConfig,
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

/// Complete, serializable configuration for one research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub data: DataConfig,
    pub backtest: BacktestSettings,
    pub pipeline: PipelineConfig,
}

impl ResearchConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let bt = &self.backtest;
        if bt.start > bt.end {
            return invalid(format!(
                "backtest start {} is after end {}",
                bt.start, bt.end
            ));
        }
        if let Some(history_start) = self.data.history_start {
            if history_start > bt.start {
                return invalid(format!(
                    "history_start {history_start} is after backtest start {}",
                    bt.start
                ));
            }
        }
        if !(bt.periods_per_year.is_finite() && bt.periods_per_year > 0.0) {
            return invalid(format!(
                "periods_per_year must be > 0, got {}",
                bt.periods_per_year
            ));
        }
        if let DataSpec::Synthetic(synth) = &self.data.source {
            synth.validate().map_err(ConfigError::Invalid)?;
        }
        self.engine_config()
            .validate()
            .map_err(ConfigError::Invalid)?;
        self.pipeline
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        let bt = &self.backtest;
        EngineConfig {
            rebalance_every: bt.rebalance_every,
            min_trade_weight: bt.min_trade_weight,
            ..EngineConfig::with_costs(bt.initial_nav, bt.costs.model())
        }
    }

    /// Deterministic run id: BLAKE3 over the JSON-serialized configuration and
    /// the dataset hash.
    pub fn run_id(&self, dataset_hash: &str) -> Result<RunId, ConfigError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        bytes.extend_from_slice(dataset_hash.as_bytes());
        Ok(RunId::from_bytes(&bytes))
    }

    /// A self-contained demo on synthetic data: momentum and low volatility
    /// under a two-state HMM, regime-conditional regression, long-only top 10.
    pub fn synthetic_demo() -> Self {
        use regimelab_core::data::SyntheticConfig;
        use regimelab_core::factors::{FactorDefinition, FactorSpec};
        use regimelab_core::model::{EstimatorKind, ModelConfig, RegimePolicy};
        use regimelab_core::portfolio::{BucketWeighting, Constraints, ConstructorKind};
        use regimelab_core::regime::{EstimationWindow, RegimeConfig, RegimeModelKind};

        let synth = SyntheticConfig {
            instruments: 30,
            periods: 756,
            ..Default::default()
        };
        let start = synth.start;
        let pipeline = PipelineConfig {
            factors: vec![
                FactorSpec::new(
                    FactorDefinition::Momentum {
                        lookback: 126,
                        skip: 21,
                    },
                    1.0e-3,
                ),
                FactorSpec::new(FactorDefinition::LowVolatility { lookback: 63 }, 5.0e-4),
            ],
            regime: RegimeConfig {
                model: RegimeModelKind::Hmm {
                    n_states: 2,
                    max_iterations: 200,
                    tolerance: 1e-6,
                },
                reestimate_every: 63,
                window: EstimationWindow::Expanding,
                min_observations: 126,
                ..Default::default()
            },
            model: ModelConfig {
                estimator: EstimatorKind::Regression {
                    policy: RegimePolicy::RegimeRegressor,
                },
                ..Default::default()
            },
            constructor: ConstructorKind::RankBucket {
                long_count: 10,
                short_count: 0,
                weighting: BucketWeighting::InverseVolatility,
            },
            constraints: Constraints {
                max_weight: 0.15,
                ..Default::default()
            },
            ..PipelineConfig::momentum_top(10, 126)
        };
        Self {
            data: DataConfig {
                source: DataSpec::Synthetic(synth),
                instruments: Vec::new(),
                history_start: None,
            },
            backtest: BacktestSettings {
                start: start + chrono::Duration::days(270),
                end: start + chrono::Duration::days(1100),
                initial_nav: default_initial_nav(),
                rebalance_every: 5,
                min_trade_weight: 0.0,
                costs: CostConfig::Preset {
                    preset: CostPreset::Realistic,
                },
                periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            },
            pipeline,
        }
    }
}
