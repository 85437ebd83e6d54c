//! RegimeLab Runner: research orchestration on top of `regimelab-core`.
//!
//! This crate provides:
//! - TOML research configuration with deterministic run ids
//! - Panel loading from CSV, Parquet or the synthetic generator
//! - Single-run orchestration (pipeline → engine → metrics)
//! - Performance metrics, overall and per regime
//! - JSON/CSV artifact export
//! - Parallel parameter sweeps

pub mod config;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod runner;
pub mod sweep;

pub use config::{BacktestSettings, ConfigError, CostConfig, ResearchConfig};
pub use data_loader::{load_panel, DataConfig, DataSpec, LoadError, LoadedPanel};
pub use export::{load_artifacts, save_artifacts};
pub use metrics::{PerformanceReport, RegimeStats};
pub use runner::{
    detect_regimes, run_on_panel, run_research, RegimeReport, ResearchResult, RunError,
    SCHEMA_VERSION,
};
pub use sweep::{run_sweep, RankMetric, SweepAxis, SweepConfig, SweepOutcome, SweepResults};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<ResearchConfig>();
        assert_sync::<ResearchConfig>();
        assert_send::<SweepConfig>();
        assert_sync::<SweepConfig>();
    }

    #[test]
    fn loaded_panel_is_shareable_across_sweep_workers() {
        assert_send::<LoadedPanel>();
        assert_sync::<LoadedPanel>();
    }

    #[test]
    fn results_are_send_sync() {
        assert_send::<ResearchResult>();
        assert_sync::<ResearchResult>();
        assert_send::<PerformanceReport>();
        assert_sync::<PerformanceReport>();
        assert_send::<SweepResults>();
        assert_sync::<SweepResults>();
    }
}
