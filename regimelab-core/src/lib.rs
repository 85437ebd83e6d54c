//! RegimeLab Core: panel data, factors, regimes, factor model, portfolio
//! construction, backtest loop.
//!
//! This crate contains the research chain end to end:
//! - Panel data model, providers (CSV, Parquet, synthetic), universe rules
//! - Factor library with cross-sectional normalization
//! - Regime detection (static, Gaussian HMM, volatility threshold) with
//!   point-in-time filtered states
//! - Factor model turning scores and regime into expected returns
//! - Risk model and portfolio constructors under hard constraints
//! - Period-by-period backtest loop with transaction costs
//!
//! Every value computed for period t reads panel data dated <= t only.

pub mod data;
pub mod domain;
pub mod engine;
pub mod factors;
pub mod model;
pub mod pipeline;
pub mod portfolio;
pub mod regime;
pub mod rng;
pub mod stats;

pub use pipeline::{InfeasiblePolicy, PipelineConfig, PipelineError, ResearchPipeline};
