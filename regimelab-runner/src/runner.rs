//! Research runner: wires together panel loading, the research pipeline, the
//! engine and metrics.
//!
//! Entry points:
//! - `run_research()`: loads the configured panel, then runs. Used by the CLI.
//! - `run_on_panel()`: takes a pre-loaded panel. Used by sweeps, which share
//!   one panel across many configurations.
//! - `detect_regimes()`: regime detection only, for inspecting the state path.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use regimelab_core::data::DataSource;
use regimelab_core::engine::{EngineError, PeriodRecord};
use regimelab_core::regime::{
    EstimationFailure, RegimeDetector, RegimeLabel, RegimeSnapshot, RegimeState,
};
use regimelab_core::{PipelineError, ResearchPipeline};

use crate::config::{ConfigError, ResearchConfig};
use crate::data_loader::{load_panel, LoadError, LoadedPanel};
use crate::metrics::PerformanceReport;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("no panel periods fall inside {start}..={end}")]
    EmptyRange { start: NaiveDate, end: NaiveDate },
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// One fitted regime snapshot, flattened for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub estimated_at: usize,
    pub estimation_date: NaiveDate,
    pub observations_used: usize,
    pub labels: Vec<RegimeLabel>,
    /// Row-stochastic transition matrix, one row per state.
    pub transition: Vec<Vec<f64>>,
    pub log_likelihood: Option<f64>,
    pub iterations: usize,
}

impl From<&RegimeSnapshot> for SnapshotSummary {
    fn from(s: &RegimeSnapshot) -> Self {
        let transition = s.transition();
        Self {
            estimated_at: s.estimated_at,
            estimation_date: s.estimation_date,
            observations_used: s.observations_used,
            labels: s.labels.clone(),
            transition: transition.rows().into_iter().map(|r| r.to_vec()).collect(),
            log_likelihood: s.log_likelihood,
            iterations: s.iterations,
        }
    }
}

/// Every estimation the detector attempted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeSummary {
    pub snapshots: Vec<SnapshotSummary>,
    pub failures: Vec<EstimationFailure>,
}

impl RegimeSummary {
    pub fn from_detector(detector: &RegimeDetector) -> Self {
        Self {
            snapshots: detector.snapshots().iter().map(SnapshotSummary::from).collect(),
            failures: detector.failures().to_vec(),
        }
    }
}

/// Complete result of a single research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: String,
    pub dataset_hash: String,
    pub data_source: DataSource,
    pub has_synthetic: bool,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub report: PerformanceReport,
    pub history: Vec<PeriodRecord>,
    pub regimes: RegimeSummary,
    pub config: ResearchConfig,
}

/// Point-in-time regime path over a loaded panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeReport {
    pub dataset_hash: String,
    pub dates: Vec<NaiveDate>,
    pub states: Vec<RegimeState>,
    pub summary: RegimeSummary,
}

/// Load the configured panel and run.
pub fn run_research(config: &ResearchConfig) -> Result<ResearchResult, RunError> {
    config.validate()?;
    let loaded = load_panel(&config.data, config.backtest.end)?;
    run_on_panel(config, &loaded)
}

/// Run against an already-loaded panel. No I/O.
pub fn run_on_panel(
    config: &ResearchConfig,
    loaded: &LoadedPanel,
) -> Result<ResearchResult, RunError> {
    let panel = &loaded.panel;
    let (range_start, range_end) = (config.backtest.start, config.backtest.end);
    let start = panel.first_period_from(range_start);
    let end = panel.periods_through(range_end);
    if start >= end {
        return Err(RunError::EmptyRange {
            start: range_start,
            end: range_end,
        });
    }
    let run_id = config.run_id(&loaded.dataset_hash)?;
    info!(
        run_id = run_id.short(),
        start = %range_start,
        end = %range_end,
        periods = end - start,
        "research run started"
    );

    let mut pipeline = ResearchPipeline::new(panel, &config.pipeline)?;
    let run = pipeline.backtest(start, end - 1, &config.engine_config())?;
    let report = PerformanceReport::compute(&run, config.backtest.periods_per_year);
    let regimes = RegimeSummary::from_detector(pipeline.detector());

    info!(
        run_id = run_id.short(),
        final_nav = report.final_nav,
        sharpe = report.sharpe,
        held = report.held_periods,
        "research run finished"
    );

    let start_date = run.history.first().map(|r| r.date).unwrap_or(range_start);
    let end_date = run.history.last().map(|r| r.date).unwrap_or(range_end);
    Ok(ResearchResult {
        schema_version: SCHEMA_VERSION,
        run_id: run_id.0,
        dataset_hash: loaded.dataset_hash.clone(),
        data_source: loaded.source,
        has_synthetic: loaded.has_synthetic,
        start_date,
        end_date,
        report,
        history: run.history,
        regimes,
        config: config.clone(),
    })
}

/// Regime detection alone over the configured panel.
pub fn detect_regimes(
    config: &ResearchConfig,
    loaded: &LoadedPanel,
) -> Result<RegimeReport, RunError> {
    let detector = RegimeDetector::estimate(
        &loaded.panel,
        &config.pipeline.universe,
        &config.pipeline.regime,
    )
    .map_err(PipelineError::from)?;
    Ok(RegimeReport {
        dataset_hash: loaded.dataset_hash.clone(),
        dates: loaded.panel.dates().to_vec(),
        states: detector.states(),
        summary: RegimeSummary::from_detector(&detector),
    })
}
